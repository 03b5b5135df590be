use sprout_core::{Backend, Element, FlushError, FlushReport, Rect, RenderId, RenderTree, Tree};
use sprout_runtime_std::StdRuntime;

pub struct AppShell<B: Backend> {
    runtime: StdRuntime,
    tree: Tree<B>,
    content: Box<dyn Fn() -> Element>,
    viewport: (f32, f32),
    last_report: FlushReport,
}

impl<B: Backend> AppShell<B> {
    pub fn new(backend: B, content: impl Fn() -> Element + 'static) -> Self {
        let runtime = StdRuntime::new();
        let tree = runtime.tree(backend);
        let mut shell = Self {
            runtime,
            tree,
            content: Box::new(content),
            viewport: (800.0, 600.0),
            last_report: FlushReport::default(),
        };
        shell.rebuild();
        shell
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = (width, height);
        self.relayout();
    }

    pub fn viewport(&self) -> (f32, f32) {
        self.viewport
    }

    pub fn tree(&self) -> &Tree<B> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree<B> {
        &mut self.tree
    }

    pub fn backend(&self) -> &B {
        self.tree.backend()
    }

    pub fn runtime(&self) -> &StdRuntime {
        &self.runtime
    }

    /// Report of the most recent mount or flush.
    pub fn last_report(&self) -> FlushReport {
        self.last_report
    }

    /// Whether the next `tick` has work to do. Consumes the pending flush
    /// request.
    pub fn should_flush(&self) -> bool {
        let requested = self.runtime.take_flush_request();
        requested || self.tree.needs_flush() || self.tree.scheduler().has_remote_mutations()
    }

    /// One host tick: apply cross-thread mutations, then flush if anything
    /// is dirty.
    pub fn tick(&mut self) -> FlushReport {
        let applied = self.tree.drain_remote_mutations();
        if applied > 0 {
            log::debug!("applied {applied} remote mutation(s)");
        }
        self.runtime.take_flush_request();
        if !self.tree.needs_flush() {
            return FlushReport::default();
        }
        let result = self.tree.flush();
        self.finish(result, "flush")
    }

    /// Rebuild from the root with a fresh description.
    pub fn rebuild(&mut self) -> FlushReport {
        let result = self.tree.mount((self.content)());
        self.finish(result, "root rebuild")
    }

    pub fn log_debug_info(&self) {
        log::info!("current tree:\n{}", self.tree.dump_tree());
        log::info!("render tree:\n{}", self.tree.render_tree().dump());
    }

    fn finish(&mut self, result: Result<FlushReport, FlushError>, pass: &str) -> FlushReport {
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                log::error!("{pass} failed: {err}");
                for error in &err.errors {
                    log::error!("  {error}");
                }
                err.report
            }
        };
        self.last_report = report;
        self.relayout();
        report
    }

    /// Stack layout: roots fill the viewport and each host splits its
    /// height evenly between its render children.
    fn relayout(&mut self) {
        let (width, height) = self.viewport;
        let render = self.tree.render_tree_mut();
        let roots = render.roots().to_vec();
        for root in roots {
            layout_node(render, root, Rect::new(0.0, 0.0, width, height));
        }
    }
}

fn layout_node(render: &mut RenderTree, id: RenderId, rect: Rect) {
    render.set_geometry(id, rect);
    let children = render.children(Some(id)).to_vec();
    if children.is_empty() {
        return;
    }
    let row = rect.height / children.len() as f32;
    for (index, child) in children.into_iter().enumerate() {
        let top = rect.y + row * index as f32;
        layout_node(render, child, Rect::new(rect.x, top, rect.width, row));
    }
}
