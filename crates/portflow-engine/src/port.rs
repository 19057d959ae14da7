//! Port model
//!
//! Ports live in an arena owned by the graph and are addressed by
//! [`PortId`]. A connection is a pair of reciprocal [`Link`] records, one on
//! each endpoint, so either side can enumerate its peers and removing a node
//! can sever every link without dangling references.
//!
//! Cardinality follows the port kind:
//!
//! | Kind      | Direction | Cardinality |
//! |-----------|-----------|-------------|
//! | `Input`   | sink      | single      |
//! | `Output`  | source    | multi       |
//! | `ExecIn`  | sink      | multi       |
//! | `ExecOut` | source    | single      |
//!
//! Nodes hold typed handles ([`InputPort<T>`], [`OutputPort<T>`],
//! [`ExecInPort`], [`ExecOutPort`]) that are plain copies of the id plus the
//! declared type.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::conversion::{Conversion, ConversionResolver};
use crate::ids::{NodeId, PortId};
use crate::value::{BoxValue, ValueType};

/// The four port kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Input,
    Output,
    ExecIn,
    ExecOut,
}

/// How many links a port may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Single,
    Multi,
}

impl PortKind {
    pub fn cardinality(self) -> Cardinality {
        match self {
            PortKind::Input | PortKind::ExecOut => Cardinality::Single,
            PortKind::Output | PortKind::ExecIn => Cardinality::Multi,
        }
    }

    pub fn is_exec(self) -> bool {
        matches!(self, PortKind::ExecIn | PortKind::ExecOut)
    }

    /// Whether values or control leave the node through this port
    pub fn is_source(self) -> bool {
        matches!(self, PortKind::Output | PortKind::ExecOut)
    }

    /// The only kind this kind may connect to
    pub fn complement(self) -> PortKind {
        match self {
            PortKind::Input => PortKind::Output,
            PortKind::Output => PortKind::Input,
            PortKind::ExecIn => PortKind::ExecOut,
            PortKind::ExecOut => PortKind::ExecIn,
        }
    }
}

/// One side of a connection
#[derive(Clone)]
pub(crate) struct Link {
    pub peer: PortId,
    /// Source-to-sink conversion, present on data links only
    pub conversion: Option<Conversion>,
}

/// Arena entry for a port
pub(crate) struct PortSlot {
    pub id: PortId,
    pub node: NodeId,
    pub name: String,
    pub kind: PortKind,
    /// `None` for exec ports
    pub value_type: Option<ValueType>,
    /// Current value of an input, or the last value pushed through an output
    pub value: Option<BoxValue>,
    pub links: Vec<Link>,
}

impl PortSlot {
    pub fn data(id: PortId, node: NodeId, name: &str, kind: PortKind, value_type: ValueType) -> Self {
        Self {
            id,
            node,
            name: name.to_string(),
            kind,
            value_type: Some(value_type),
            value: None,
            links: Vec::new(),
        }
    }

    pub fn exec(id: PortId, node: NodeId, name: &str, kind: PortKind) -> Self {
        Self {
            id,
            node,
            name: name.to_string(),
            kind,
            value_type: None,
            value: None,
            links: Vec::new(),
        }
    }

    /// Whether this port agrees to connect to `other`
    pub fn accepts(&self, other: &PortSlot, resolver: &ConversionResolver) -> bool {
        if other.kind != self.kind.complement() || other.id == self.id {
            return false;
        }
        if self.kind.is_exec() {
            return true;
        }
        if other.node == self.node {
            return false;
        }
        self.conversion_with(other, resolver).is_some()
    }

    /// Source-to-sink conversion between this data port and `other`
    pub fn conversion_with(&self, other: &PortSlot, resolver: &ConversionResolver) -> Option<Conversion> {
        let (source, sink) = if self.kind.is_source() {
            (self, other)
        } else {
            (other, self)
        };
        resolver.resolve(source.value_type?, sink.value_type?)
    }

    pub fn is_linked_to(&self, peer: PortId) -> bool {
        self.links.iter().any(|link| link.peer == peer)
    }

    /// Remove the link to `peer`, returning whether one existed
    pub fn unlink(&mut self, peer: PortId) -> bool {
        let before = self.links.len();
        self.links.retain(|link| link.peer != peer);
        self.links.len() != before
    }

    pub fn value_string(&self) -> String {
        self.value
            .as_ref()
            .map(|value| value.display_value())
            .unwrap_or_default()
    }
}

/// Read-only view of a port
#[derive(Clone, Copy)]
pub struct PortView<'g> {
    slot: &'g PortSlot,
}

impl<'g> PortView<'g> {
    pub(crate) fn new(slot: &'g PortSlot) -> Self {
        Self { slot }
    }

    pub fn id(&self) -> PortId {
        self.slot.id
    }

    /// Owning node
    pub fn node(&self) -> NodeId {
        self.slot.node
    }

    pub fn name(&self) -> &'g str {
        &self.slot.name
    }

    pub fn kind(&self) -> PortKind {
        self.slot.kind
    }

    pub fn cardinality(&self) -> Cardinality {
        self.slot.kind.cardinality()
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.slot.value_type
    }

    /// Peers in connection order
    pub fn connected_ports(&self) -> Vec<PortId> {
        self.slot.links.iter().map(|link| link.peer).collect()
    }

    pub fn is_connected(&self) -> bool {
        !self.slot.links.is_empty()
    }

    /// Human-readable current value, empty when there is none
    pub fn value_string(&self) -> String {
        self.slot.value_string()
    }
}

impl fmt::Debug for PortView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortView")
            .field("id", &self.slot.id)
            .field("node", &self.slot.node)
            .field("name", &self.slot.name)
            .field("kind", &self.slot.kind)
            .field("value_type", &self.slot.value_type)
            .field("links", &self.slot.links.len())
            .finish()
    }
}

macro_rules! typed_port_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            id: PortId,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub(crate) fn new(id: PortId) -> Self {
                Self {
                    id,
                    _marker: PhantomData,
                }
            }

            pub fn id(&self) -> PortId {
                self.id
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>({})", stringify!($name), std::any::type_name::<T>(), self.id)
            }
        }

        impl<T> From<$name<T>> for PortId {
            fn from(port: $name<T>) -> Self {
                port.id
            }
        }
    };
}

typed_port_handle!(
    /// Handle to a data input carrying `T`
    InputPort
);

typed_port_handle!(
    /// Handle to a data output carrying `T`
    OutputPort
);

macro_rules! exec_port_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(PortId);

        impl $name {
            pub(crate) fn new(id: PortId) -> Self {
                Self(id)
            }

            pub fn id(&self) -> PortId {
                self.0
            }
        }

        impl From<$name> for PortId {
            fn from(port: $name) -> Self {
                port.0
            }
        }
    };
}

exec_port_handle!(
    /// Handle to a control-flow sink
    ExecInPort
);

exec_port_handle!(
    /// Handle to a control-flow source
    ExecOutPort
);

#[cfg(test)]
mod tests {
    use super::*;

    fn data(node: NodeId, kind: PortKind, ty: ValueType) -> PortSlot {
        PortSlot::data(PortId::new(), node, "p", kind, ty)
    }

    fn exec(node: NodeId, kind: PortKind) -> PortSlot {
        PortSlot::exec(PortId::new(), node, "e", kind)
    }

    #[test]
    fn test_kind_cardinality() {
        assert_eq!(PortKind::Input.cardinality(), Cardinality::Single);
        assert_eq!(PortKind::Output.cardinality(), Cardinality::Multi);
        assert_eq!(PortKind::ExecIn.cardinality(), Cardinality::Multi);
        assert_eq!(PortKind::ExecOut.cardinality(), Cardinality::Single);
        assert_eq!(PortKind::ExecIn.complement(), PortKind::ExecOut);
    }

    #[test]
    fn test_accepts_checks_both_kind_and_type() {
        let resolver = ConversionResolver::new();
        let (a, b) = (NodeId::new(), NodeId::new());

        let out_i8 = data(a, PortKind::Output, ValueType::of::<i8>());
        let in_i32 = data(b, PortKind::Input, ValueType::of::<i32>());
        assert!(out_i8.accepts(&in_i32, &resolver));
        assert!(in_i32.accepts(&out_i8, &resolver));

        let out_i32 = data(a, PortKind::Output, ValueType::of::<i32>());
        let in_i8 = data(b, PortKind::Input, ValueType::of::<i8>());
        assert!(!out_i32.accepts(&in_i8, &resolver));
        assert!(!in_i8.accepts(&out_i32, &resolver));

        let other_out = data(b, PortKind::Output, ValueType::of::<i32>());
        assert!(!out_i32.accepts(&other_out, &resolver));
    }

    #[test]
    fn test_data_self_loop_rejected_exec_allowed() {
        let resolver = ConversionResolver::new();
        let node = NodeId::new();

        let out = data(node, PortKind::Output, ValueType::of::<i32>());
        let input = data(node, PortKind::Input, ValueType::of::<i32>());
        assert!(!out.accepts(&input, &resolver));

        let exec_out = exec(node, PortKind::ExecOut);
        let exec_in = exec(node, PortKind::ExecIn);
        assert!(exec_out.accepts(&exec_in, &resolver));
        assert!(!exec_out.accepts(&input, &resolver));
    }

    #[test]
    fn test_handles_convert_to_port_id() {
        let id = PortId::new();
        let handle: InputPort<String> = InputPort::new(id);
        let copy = handle;
        assert_eq!(PortId::from(copy), id);
        assert_eq!(handle, copy);
        assert_eq!(PortId::from(ExecOutPort::new(id)), id);
    }
}
