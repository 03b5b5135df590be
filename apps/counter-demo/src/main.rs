use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use sprout_app_shell::AppShell;
use sprout_core::{Component, Element, MemoryBackend, Props, RenderCx};

const ROUNDS: u32 = 6;

#[derive(Default)]
struct Items {
    entries: Vec<(u32, String)>,
    next_id: u32,
}

/// A keyed list fed from a background thread. Rotating the list after
/// each insert shows keyed children being moved instead of rebuilt.
struct ItemList;

impl Component for ItemList {
    type State = Items;

    fn init_state(&self) -> Items {
        Items::default()
    }

    fn render(&self, cx: &RenderCx<'_, Items>) -> anyhow::Result<Element> {
        let rows = cx.read(|items| {
            items
                .entries
                .iter()
                .map(|(id, label)| row(*id, label))
                .collect::<Vec<_>>()
        })?;
        let count = rows.len() as i64;
        Ok(Element::host(
            "column",
            Props::new(),
            vec![
                Element::leaf("text", Props::new().with("value", "Items")),
                Element::leaf("text", Props::new().with("count", count)),
                Element::fragment(rows),
            ],
        ))
    }
}

struct Row {
    label: String,
}

impl Component for Row {
    type State = ();

    fn init_state(&self) {}

    fn render(&self, _cx: &RenderCx<'_, ()>) -> anyhow::Result<Element> {
        if self.label.contains("boom") {
            anyhow::bail!("row {:?} refused to render", self.label);
        }
        Ok(Element::leaf(
            "text",
            Props::new().with("value", self.label.as_str()),
        ))
    }
}

fn row(id: u32, label: &str) -> Element {
    let content = Element::component(Row {
        label: label.to_owned(),
    });
    Element::boundary(content, |error| {
        Element::leaf(
            "text",
            Props::new().with("value", format!("<error: {}>", error.cause())),
        )
    })
    .keyed(&id)
}

fn main() {
    env_logger::init();

    println!("=== Sprout Counter Demo ===");
    println!("A worker thread inserts rows; each tick flushes the dirty list once.");
    println!("Rows are keyed, so rotating the list moves render nodes instead of rebuilding them.");
    println!();

    let (wake_tx, wake_rx) = mpsc::channel::<()>();
    let mut app = AppShell::new(MemoryBackend::new(), || Element::component(ItemList));
    app.runtime().set_frame_waker(move || {
        let _ = wake_tx.send(());
    });
    app.set_viewport(320.0, 480.0);

    let Some(remote) = app
        .tree()
        .root()
        .and_then(|root| app.tree().state_handle::<Items>(root))
        .and_then(|state| state.remote())
    else {
        log::error!("item list did not mount");
        return;
    };

    let worker = thread::spawn(move || {
        for round in 0..ROUNDS {
            thread::sleep(Duration::from_millis(50));
            let label = if round == 3 {
                "boom".to_owned()
            } else {
                format!("item {round}")
            };
            let queued = remote.request_mutation(move |items: &mut Items| {
                let id = items.next_id;
                items.next_id += 1;
                items.entries.push((id, label));
                items.entries.rotate_right(1);
            });
            if let Err(err) = queued {
                log::warn!("worker stopped: {err}");
                break;
            }
        }
    });

    let mut frames = 0;
    while frames < ROUNDS {
        if wake_rx.recv_timeout(Duration::from_secs(1)).is_err() {
            log::warn!("no frame requested within a second; stopping");
            break;
        }
        if !app.should_flush() {
            continue;
        }
        let report = app.tick();
        frames += 1;
        println!(
            "frame {frames}: rebuilt={} created={} destroyed={} reused={} caught={}",
            report.rebuilt, report.created, report.destroyed, report.reused, report.caught
        );
        print!("{}", app.tree().render_tree().dump());
        println!();
    }

    if worker.join().is_err() {
        log::error!("worker thread panicked");
    }
    app.log_debug_info();
}
