//! DRAGON route filtering.
//!
//! A more specific route need not be advertised when a less specific one
//! already covers it, unless the broader route goes through a relation
//! that outranks the candidate's.

use ilpc_core::Relation;

use crate::route::Route;
use crate::routing_table::ForwardingRoutingTable;

/// Whether `route` for `prefix` is redundant given the advertised ancestors.
pub fn can_dragon_filter<F>(
    table: &ForwardingRoutingTable,
    relation_of: F,
    prefix: &str,
    route: &Route,
) -> bool
where
    F: Fn(&str) -> Relation,
{
    for ancestor in table.keys_prefixes_of(prefix) {
        let Some(ancestor_route) = table.get(&ancestor).and_then(|u| u.route) else {
            continue;
        };
        if ancestor_route.next_hop.is_empty() {
            continue;
        }
        let ancestor_priority = relation_of(&ancestor_route.next_hop).priority();
        let candidate_priority = relation_of(&route.next_hop).priority();
        if ancestor_priority < candidate_priority {
            continue;
        }
        tracing::trace!(prefix = %prefix, ancestor = %ancestor, "applied DRAGON route filter");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(id: &str) -> Relation {
        match id {
            "parent" => Relation::Parent,
            "peer" => Relation::Peer,
            "child" => Relation::Child,
            _ => Relation::Local,
        }
    }

    fn via(next_hop: &str) -> Route {
        Route::new(next_hop, vec!["test.me".into()], [0; 32])
    }

    #[test]
    fn test_no_ancestor_no_filter() {
        let table = ForwardingRoutingTable::new();
        assert!(!can_dragon_filter(&table, relation, "test.a.b", &via("peer")));
    }

    #[test]
    fn test_peer_ancestor_does_not_filter_child_route() {
        let table = ForwardingRoutingTable::new();
        table.publish("test.a", Some(via("peer")));
        assert!(!can_dragon_filter(&table, relation, "test.a.b", &via("child")));
    }

    #[test]
    fn test_equal_or_worse_ancestor_filters() {
        let table = ForwardingRoutingTable::new();
        table.publish("test.a", Some(via("child")));
        assert!(can_dragon_filter(&table, relation, "test.a.b", &via("peer")));
        assert!(can_dragon_filter(&table, relation, "test.a.b", &via("child")));
    }

    #[test]
    fn test_local_and_withdrawn_ancestors_are_skipped() {
        let table = ForwardingRoutingTable::new();
        table.publish("test.a", Some(Route::local([0; 32])));
        table.publish("test.a.b", Some(via("parent")));
        table.publish("test.a.b", None);
        assert!(!can_dragon_filter(&table, relation, "test.a.b.c", &via("peer")));
    }
}
