use uuid::Uuid;

/// How a chain node relates to the node before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// The singular system root; resolved unconditionally.
    Root,
    /// A collection addressed at the root by its plural name, with no
    /// owning column anywhere (free-standing root table).
    TopLevel,
    /// Owning edge traversed through `column` on `via_table`.
    Child { via_table: String, column: String },
    /// Non-owning edge traversed through `column` on `via_table`.
    Reference { via_table: String, column: String },
    /// Child edge declared only on the far side; addressed from the root
    /// by plural name.
    BackReference { owner_table: String, column: String },
}

impl Relation {
    pub fn is_child(&self) -> bool {
        matches!(self, Relation::Child { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Relation::Reference { .. })
    }
}

/// One member of a resolved collection. `key` is set for key/value
/// references, where the member is addressed by map key instead of index.
#[derive(Debug, Clone)]
pub struct Member {
    pub key: Option<String>,
    pub uuid: Uuid,
}

/// One resolved segment pair of a request URI.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub table: String,
    pub relation: Relation,
    /// The addressed row. `None` for collection nodes and for a trailing
    /// id that did not resolve (legal only on the create path).
    pub row: Option<Uuid>,
    /// Raw id segment(s) as they appeared in the URI, if any.
    pub index: Option<String>,
    /// Key within the owning map column, for key/value references.
    pub key: Option<String>,
    /// Whether this node addresses the whole collection.
    pub is_collection: bool,
    /// Collection membership at resolution time; empty for row nodes.
    pub members: Vec<Member>,
}

/// Resolved form of a URI: an ordered root-to-leaf sequence of nodes.
/// Built per request, consumed by the query/read/write engines, never
/// persisted.
#[derive(Debug, Clone)]
pub struct ResourceChain {
    pub nodes: Vec<ResourceNode>,
}

impl ResourceChain {
    pub fn last(&self) -> &ResourceNode {
        self.nodes.last().expect("chain always has a root node")
    }

    pub fn last_mut(&mut self) -> &mut ResourceNode {
        self.nodes.last_mut().expect("chain always has a root node")
    }

    /// The node owning the addressed node, if the chain is longer than
    /// the root alone.
    pub fn parent(&self) -> Option<&ResourceNode> {
        if self.nodes.len() >= 2 {
            self.nodes.get(self.nodes.len() - 2)
        } else {
            None
        }
    }
}
