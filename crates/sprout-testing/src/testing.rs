use sprout_core::{
    Component, Element, FlushError, FlushReport, MemoryBackend, NodeId, StateHandle, Tree,
    TreeOptions,
};

/// Headless harness for exercising trees in tests.
///
/// `TreeTestRule` owns a tree over the recording [`MemoryBackend`] and keeps
/// the root description builder around so a test can force a parent rebuild
/// at the root, drive flushes until idle and assert on the host output.
pub struct TreeTestRule {
    tree: Tree<MemoryBackend>,
    content: Option<Box<dyn Fn() -> Element>>,
}

impl TreeTestRule {
    pub fn new() -> Self {
        Self::with_options(TreeOptions::default())
    }

    pub fn with_options(options: TreeOptions) -> Self {
        Self {
            tree: Tree::with_options(MemoryBackend::new(), options),
            content: None,
        }
    }

    /// Install the root description builder and mount its first output.
    pub fn set_content(
        &mut self,
        content: impl Fn() -> Element + 'static,
    ) -> Result<FlushReport, FlushError> {
        self.content = Some(Box::new(content));
        self.recomposition()
    }

    /// Rebuild from the root with a fresh description from the installed
    /// content. Does nothing before `set_content`.
    pub fn recomposition(&mut self) -> Result<FlushReport, FlushError> {
        match self.content.as_ref() {
            Some(content) => self.tree.mount(content()),
            None => Ok(FlushReport::default()),
        }
    }

    /// Apply queued remote mutations and flush until nothing is pending.
    /// Returns the summed report of every pass.
    pub fn pump_until_idle(&mut self) -> Result<FlushReport, FlushError> {
        let mut total = FlushReport::default();
        loop {
            let mut progressed = self.tree.drain_remote_mutations() > 0;
            if self.tree.needs_flush() {
                let report = self.tree.flush()?;
                accumulate(&mut total, report);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        Ok(total)
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.tree.root()
    }

    pub fn tree(&self) -> &Tree<MemoryBackend> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree<MemoryBackend> {
        &mut self.tree
    }

    pub fn backend_mut(&mut self) -> &mut MemoryBackend {
        self.tree.backend_mut()
    }

    /// State handle of the first mounted `C` in pre-order.
    pub fn state_of<C: Component>(&self) -> Option<StateHandle<C::State>> {
        let id = self.tree.find_component::<C>().into_iter().next()?;
        self.tree.state_handle::<C::State>(id)
    }

    /// Text values of the `name` prop across render nodes in pre-order.
    pub fn text_values(&self, name: &str) -> Vec<String> {
        let render = self.tree.render_tree();
        render
            .preorder()
            .into_iter()
            .filter_map(|id| render.get(id)?.props().text(name).map(str::to_owned))
            .collect()
    }

    pub fn dump_tree(&self) -> String {
        self.tree.dump_tree()
    }
}

impl Default for TreeTestRule {
    fn default() -> Self {
        Self::new()
    }
}

fn accumulate(total: &mut FlushReport, report: FlushReport) {
    total.rebuilt += report.rebuilt;
    total.created += report.created;
    total.destroyed += report.destroyed;
    total.reused += report.reused;
    total.stale_dropped += report.stale_dropped;
    total.deduplicated += report.deduplicated;
    total.caught += report.caught;
}

/// Convenience helper for tests that only need temporary access to a
/// `TreeTestRule`.
pub fn run_test_tree<R>(f: impl FnOnce(&mut TreeTestRule) -> R) -> R {
    let mut rule = TreeTestRule::new();
    f(&mut rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprout_core::{Props, RenderCx};

    struct Greeting {
        name: &'static str,
    }

    impl Component for Greeting {
        type State = u32;

        fn init_state(&self) -> u32 {
            0
        }

        fn render(&self, cx: &RenderCx<'_, u32>) -> anyhow::Result<Element> {
            let visits = cx.read(|visits| *visits)?;
            Ok(Element::leaf(
                "text",
                Props::new().with("value", format!("hello {} x{visits}", self.name)),
            ))
        }
    }

    #[test]
    fn tree_test_rule_reports_content_and_root() {
        run_test_tree(|rule| {
            assert!(!rule.has_content());
            assert!(rule.root_id().is_none());
            assert_eq!(rule.recomposition().expect("no content"), FlushReport::default());

            rule.set_content(|| Element::component(Greeting { name: "sprout" }))
                .expect("install content");
            assert!(rule.has_content());
            let root = rule.root_id().expect("root id available");
            assert_eq!(rule.text_values("value"), vec!["hello sprout x0"]);

            rule.state_of::<Greeting>()
                .expect("greeting state")
                .request_mutation(|visits| *visits = 2)
                .expect("mutate");
            let report = rule.pump_until_idle().expect("process mutation");

            assert_eq!(report.rebuilt, 1);
            assert_eq!(rule.root_id(), Some(root));
            assert_eq!(rule.text_values("value"), vec!["hello sprout x2"]);
            assert!(!rule.tree().needs_flush());
        });
    }

    #[test]
    fn pump_applies_remote_mutations() {
        run_test_tree(|rule| {
            rule.set_content(|| Element::component(Greeting { name: "remote" }))
                .expect("install content");
            let remote = rule
                .state_of::<Greeting>()
                .and_then(|state| state.remote())
                .expect("remote handle");

            std::thread::spawn(move || remote.request_mutation(|visits| *visits += 1))
                .join()
                .expect("worker thread")
                .expect("queued");
            rule.pump_until_idle().expect("pump");

            assert_eq!(rule.text_values("value"), vec!["hello remote x1"]);
        });
    }
}
