//! Description nodes: immutable values produced fresh on every rebuild.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{MutationError, ProducerError};
use crate::handle::{NodeCell, StateHandle};
use crate::hash::hash_one;
use crate::props::Props;
use crate::NodeId;

/// Explicit identity used to pair children across rebuilds independent of position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(u64);

impl Key {
    /// Derive a key by hashing any value.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        Key(hash_one(value))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Key(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Tag naming a terminal (host) kind, such as `"text"` or `"column"`.
pub type HostTag = &'static str;

/// Identity of a composite kind: the Rust type implementing [`Component`].
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    pub fn of<C: Component>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Discriminant shared by description, reconciliation and render nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Terminal kind that owns a render node.
    Host(HostTag),
    /// Composite kind whose producer yields a child description.
    Component(ComponentType),
    /// Catches producer errors from descendants and shows fallback content.
    Boundary,
    /// Structural grouping without a render node.
    Fragment,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Host(tag) => *tag,
            Kind::Component(ty) => ty.name(),
            Kind::Boundary => "boundary",
            Kind::Fragment => "fragment",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Host(tag) => write!(f, "<{tag}>"),
            Kind::Component(ty) => write!(f, "{}", short_type_name(ty.name())),
            Kind::Boundary => f.write_str("Boundary"),
            Kind::Fragment => f.write_str("Fragment"),
        }
    }
}

fn short_type_name(name: &'static str) -> &'static str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Builds fallback content for an error boundary.
pub type Fallback = Rc<dyn Fn(&ProducerError) -> Element>;

/// Immutable description of what the UI should look like at one position.
#[derive(Clone)]
pub struct Element {
    key: Option<Key>,
    body: ElementBody,
}

#[derive(Clone)]
pub(crate) enum ElementBody {
    Host {
        tag: HostTag,
        props: Props,
        children: Vec<Element>,
    },
    Component(Rc<dyn AnyComponent>),
    Boundary {
        child: Box<Element>,
        fallback: Fallback,
    },
    Fragment {
        children: Vec<Element>,
    },
}

impl Element {
    pub fn host(tag: HostTag, props: Props, children: Vec<Element>) -> Self {
        Self::from_body(ElementBody::Host {
            tag,
            props,
            children,
        })
    }

    /// Host element without children.
    pub fn leaf(tag: HostTag, props: Props) -> Self {
        Self::host(tag, props, Vec::new())
    }

    pub fn component<C: Component>(component: C) -> Self {
        Self::from_body(ElementBody::Component(Rc::new(component)))
    }

    pub fn boundary(child: Element, fallback: impl Fn(&ProducerError) -> Element + 'static) -> Self {
        Self::from_body(ElementBody::Boundary {
            child: Box::new(child),
            fallback: Rc::new(fallback),
        })
    }

    pub fn fragment(children: Vec<Element>) -> Self {
        Self::from_body(ElementBody::Fragment { children })
    }

    /// Renders nothing.
    pub fn empty() -> Self {
        Self::fragment(Vec::new())
    }

    fn from_body(body: ElementBody) -> Self {
        Self { key: None, body }
    }

    pub(crate) fn into_body(self) -> ElementBody {
        self.body
    }

    /// Attach an explicit identity derived from `value`.
    pub fn keyed<K: Hash + ?Sized>(self, value: &K) -> Self {
        self.with_key(Key::of(value))
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn key(&self) -> Option<Key> {
        self.key
    }

    pub fn kind(&self) -> Kind {
        match &self.body {
            ElementBody::Host { tag, .. } => Kind::Host(*tag),
            ElementBody::Component(component) => Kind::Component(component.component_type()),
            ElementBody::Boundary { .. } => Kind::Boundary,
            ElementBody::Fragment { .. } => Kind::Fragment,
        }
    }

    /// Props of a host element.
    pub fn props(&self) -> Option<&Props> {
        match &self.body {
            ElementBody::Host { props, .. } => Some(props),
            _ => None,
        }
    }

    /// Statically known children. Composite children only exist once produced.
    pub fn children(&self) -> &[Element] {
        match &self.body {
            ElementBody::Host { children, .. } | ElementBody::Fragment { children } => {
                children.as_slice()
            }
            ElementBody::Boundary { child, .. } => std::slice::from_ref(&**child),
            ElementBody::Component(_) => &[],
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Element");
        debug.field("kind", &self.kind()).field("key", &self.key);
        if let Some(props) = self.props() {
            debug.field("props", props);
        }
        let children = self.children();
        if !children.is_empty() {
            debug.field("children", &children);
        }
        debug.finish()
    }
}

/// A composite kind. The value itself is the immutable parameter set; the
/// associated `State` lives in the reconciliation node across rebuilds.
pub trait Component: 'static {
    type State: 'static;

    fn init_state(&self) -> Self::State;

    /// Refresh parameter-derived state when a rebuild matches this node.
    fn on_update(&self, _state: &mut Self::State) {}

    /// The producer callback.
    fn render(&self, cx: &RenderCx<'_, Self::State>) -> anyhow::Result<Element>;
}

pub(crate) trait AnyComponent {
    fn component_type(&self) -> ComponentType;
    fn init_state(&self) -> Box<dyn Any>;
    fn on_update(&self, state: &mut dyn Any);
    fn render(&self, cell: &Rc<NodeCell>) -> anyhow::Result<Element>;
}

impl<C: Component> AnyComponent for C {
    fn component_type(&self) -> ComponentType {
        ComponentType::of::<C>()
    }

    fn init_state(&self) -> Box<dyn Any> {
        Box::new(Component::init_state(self))
    }

    fn on_update(&self, state: &mut dyn Any) {
        if let Some(state) = state.downcast_mut::<C::State>() {
            Component::on_update(self, state);
        }
    }

    fn render(&self, cell: &Rc<NodeCell>) -> anyhow::Result<Element> {
        let cx = RenderCx::new(cell);
        Component::render(self, &cx)
    }
}

/// Context handed to a producer callback.
pub struct RenderCx<'a, S> {
    cell: &'a Rc<NodeCell>,
    _state: PhantomData<fn(&S)>,
}

impl<'a, S: 'static> RenderCx<'a, S> {
    pub(crate) fn new(cell: &'a Rc<NodeCell>) -> Self {
        Self {
            cell,
            _state: PhantomData,
        }
    }

    /// Read the node's state. The borrow ends when `f` returns, so mutations
    /// requested afterwards observe no outstanding reader. Reading from inside
    /// this node's own mutator fails with `ReentrantMutation`.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, MutationError> {
        self.cell.read(f)
    }

    /// Liveness token for continuations that outlive this producer call.
    pub fn handle(&self) -> StateHandle<S> {
        StateHandle::new(self.cell)
    }

    pub fn node_id(&self) -> NodeId {
        self.cell.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blank;

    impl Component for Blank {
        type State = ();

        fn init_state(&self) {}

        fn render(&self, _cx: &RenderCx<'_, ()>) -> anyhow::Result<Element> {
            Ok(Element::empty())
        }
    }

    #[test]
    fn keys_follow_hashed_value() {
        assert_eq!(Key::of("row-7"), Key::of("row-7"));
        assert_ne!(Key::of(&7u32), Key::of(&8u32));
        assert_eq!(Key::from_raw(42).raw(), 42);
    }

    #[test]
    fn kind_and_key_come_from_the_description() {
        let host = Element::leaf("text", Props::new()).keyed(&1);
        assert_eq!(host.kind(), Kind::Host("text"));
        assert_eq!(host.key(), Some(Key::of(&1)));

        let component = Element::component(Blank);
        assert_eq!(component.kind(), Kind::Component(ComponentType::of::<Blank>()));
        assert_eq!(component.kind().to_string(), "Blank");
        assert!(component.children().is_empty());

        let boundary = Element::boundary(Element::empty(), |_| Element::empty());
        assert_eq!(boundary.kind(), Kind::Boundary);
        assert_eq!(boundary.children().len(), 1);
        assert_eq!(Element::empty().kind(), Kind::Fragment);
    }
}
