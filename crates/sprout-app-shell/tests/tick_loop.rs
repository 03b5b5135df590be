use std::cell::Cell;
use std::rc::Rc;

use sprout_app_shell::AppShell;
use sprout_core::{Component, Element, MemoryBackend, Props, Rect, RenderCx};

struct Clicks {
    renders: Rc<Cell<usize>>,
}

impl Component for Clicks {
    type State = u32;

    fn init_state(&self) -> u32 {
        0
    }

    fn render(&self, cx: &RenderCx<'_, u32>) -> anyhow::Result<Element> {
        self.renders.set(self.renders.get() + 1);
        let clicks = cx.read(|clicks| *clicks)?;
        if clicks > 9 {
            anyhow::bail!("too many clicks");
        }
        Ok(Element::host(
            "column",
            Props::new(),
            vec![
                Element::leaf("text", Props::new().with("value", "Clicks")),
                Element::leaf("text", Props::new().with("value", clicks as i64)),
            ],
        ))
    }
}

fn shell(renders: &Rc<Cell<usize>>) -> AppShell<MemoryBackend> {
    let renders = renders.clone();
    AppShell::new(MemoryBackend::new(), move || {
        Element::component(Clicks {
            renders: renders.clone(),
        })
    })
}

fn clicks_root(shell: &AppShell<MemoryBackend>) -> sprout_core::NodeId {
    shell.tree().root().expect("root")
}

#[test]
fn idle_shell_settles() {
    let renders = Rc::new(Cell::new(0));
    let mut shell = shell(&renders);
    for _ in 0..5 {
        if shell.should_flush() {
            shell.tick();
        }
    }
    assert!(!shell.should_flush());
    assert_eq!(renders.get(), 1);
}

#[test]
fn tick_flushes_mutations_once() {
    let renders = Rc::new(Cell::new(0));
    let mut shell = shell(&renders);
    let state = shell
        .tree()
        .state_handle::<u32>(clicks_root(&shell))
        .expect("state handle");

    state.request_mutation(|clicks| *clicks += 1).expect("click");
    state.request_mutation(|clicks| *clicks += 1).expect("click");
    assert!(shell.should_flush());

    let report = shell.tick();
    assert_eq!(report.rebuilt, 1);
    assert_eq!(renders.get(), 2);
    assert!(!shell.should_flush());
    assert_eq!(shell.tick(), Default::default());
}

#[test]
fn background_work_reaches_the_tree_through_tick() {
    let renders = Rc::new(Cell::new(0));
    let mut shell = shell(&renders);
    let remote = shell
        .tree()
        .state_handle::<u32>(clicks_root(&shell))
        .and_then(|state| state.remote())
        .expect("remote handle");

    let worker = std::thread::spawn(move || {
        for _ in 0..3 {
            remote.request_mutation(|clicks| *clicks += 1).expect("queued");
        }
    });
    worker.join().expect("worker thread");

    assert!(shell.should_flush());
    let report = shell.tick();
    assert_eq!(report.rebuilt, 1);
    assert_eq!(
        shell
            .tree()
            .state_handle::<u32>(clicks_root(&shell))
            .expect("state handle")
            .read(|clicks| *clicks),
        Ok(3)
    );
}

#[test]
fn failed_flush_keeps_previous_output() {
    let renders = Rc::new(Cell::new(0));
    let mut shell = shell(&renders);
    let root = clicks_root(&shell);
    let before = shell.tree().dump_tree();
    shell
        .tree()
        .state_handle::<u32>(root)
        .expect("state handle")
        .request_mutation(|clicks| *clicks = 10)
        .expect("mutate");

    let report = shell.tick();

    assert_eq!(report.rebuilt, 0);
    assert_eq!(shell.tree().root(), Some(root));
    assert_eq!(shell.tree().dump_tree(), before);
    assert!(!shell.should_flush());
}

#[test]
fn layout_assigns_geometry_after_each_pass() {
    let renders = Rc::new(Cell::new(0));
    let mut shell = shell(&renders);
    shell.set_viewport(200.0, 100.0);

    let render = shell.tree().render_tree();
    let column = render.roots()[0];
    assert_eq!(
        render.get(column).and_then(|node| node.geometry()),
        Some(Rect::new(0.0, 0.0, 200.0, 100.0))
    );
    let second = render.children(Some(column))[1];
    assert_eq!(
        render.get(second).and_then(|node| node.geometry()),
        Some(Rect::new(0.0, 50.0, 200.0, 50.0))
    );
}
