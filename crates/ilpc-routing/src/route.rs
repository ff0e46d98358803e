use std::cmp::Ordering;

use ilpc_core::Relation;
use serde::Serialize;

/// A path to some prefix through a next-hop account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Account id of the next hop. Empty for routes to ourselves.
    pub next_hop: String,
    /// Connector addresses the route has travelled through.
    pub path: Vec<String>,
    #[serde(skip)]
    pub auth: [u8; 32],
}

impl Route {
    pub fn new(next_hop: impl Into<String>, path: Vec<String>, auth: [u8; 32]) -> Self {
        Self {
            next_hop: next_hop.into(),
            path,
            auth,
        }
    }

    /// Route to an address we own.
    pub fn local(auth: [u8; 32]) -> Self {
        Self::new("", Vec::new(), auth)
    }
}

/// One entry of the forwarding log. `route == None` is a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteUpdate {
    pub prefix: String,
    pub route: Option<Route>,
    pub epoch: u32,
}

/// Order two candidate routes; `Less` means `a` is preferred.
///
/// Lower relation priority wins, then the shorter path, then the
/// lexicographically larger next-hop id.
pub fn compare_routes<F>(a: &Route, b: &Route, relation_of: F) -> Ordering
where
    F: Fn(&str) -> Relation,
{
    relation_of(&a.next_hop)
        .priority()
        .cmp(&relation_of(&b.next_hop).priority())
        .then_with(|| a.path.len().cmp(&b.path.len()))
        .then_with(|| b.next_hop.cmp(&a.next_hop))
}
