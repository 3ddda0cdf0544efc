//! Interprets the four routing attributes the mediator — not the
//! handler — is responsible for (spec §4.I). Grounded on
//! `fc-router::manager`'s `QueueManager`, which consults the node's
//! leadership/shard ownership state before handing a message to a
//! worker rather than leaving that decision to the worker itself.

use catga_core::{ErrorCode, Failure, RoutingAttribute};

/// Describes this node's position in the cluster. A single-node
/// deployment uses `StaticClusterRole::solo()`, which is always the
/// leader and owns every shard — routing attributes become no-ops.
pub trait ClusterRole: Send + Sync {
    fn is_leader(&self) -> bool;
    fn shard_count(&self) -> u32;
    fn owns_shard(&self, shard: u32) -> bool;
}

/// Fixed, non-rebalancing role for tests and single-node deployments.
pub struct StaticClusterRole {
    leader: bool,
    shard_count: u32,
    owned_shards: Vec<u32>,
}

impl StaticClusterRole {
    pub fn solo() -> Self {
        Self { leader: true, shard_count: 1, owned_shards: vec![0] }
    }

    pub fn new(leader: bool, shard_count: u32, owned_shards: Vec<u32>) -> Self {
        Self { leader, shard_count, owned_shards }
    }
}

impl ClusterRole for StaticClusterRole {
    fn is_leader(&self) -> bool {
        self.leader
    }

    fn shard_count(&self) -> u32 {
        self.shard_count
    }

    fn owns_shard(&self, shard: u32) -> bool {
        self.owned_shards.contains(&shard)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Returns the shard a `Sharded { key_expr }` request routes to. Spec
/// §4.I leaves the key expression's grammar open; we resolve it
/// against dispatch metadata the same way `DistributedLock`'s key
/// template does (spec §4.H stage 4), falling back to the literal
/// expression text when no metadata field matches — so a constant
/// `key_expr` still routes deterministically.
pub fn shard_for(key_expr: &str, metadata: &catga_core::Metadata, shard_count: u32) -> u32 {
    let resolved = metadata.get(key_expr).unwrap_or(key_expr);
    (fnv1a(resolved.as_bytes()) % shard_count.max(1) as u64) as u32
}

/// Checks a single routing attribute against this node's role.
/// `ClusterSingleton` is enforced separately (it needs the
/// distributed lock, not just a role check) — see `Mediator::send`.
pub fn check_routing(
    attr: &RoutingAttribute,
    role: &dyn ClusterRole,
    metadata: &catga_core::Metadata,
) -> Result<(), Failure> {
    match attr {
        RoutingAttribute::Broadcast => Ok(()),
        RoutingAttribute::LeaderOnly => {
            if role.is_leader() {
                Ok(())
            } else {
                Err(Failure::new(ErrorCode::NotLeader, "this node is not the cluster leader"))
            }
        }
        RoutingAttribute::Sharded { key_expr } => {
            let shard = shard_for(key_expr, metadata, role.shard_count());
            if role.owns_shard(shard) {
                Ok(())
            } else {
                Err(Failure::new(ErrorCode::NotLeader, format!("this node does not own shard {shard}"))
                    .with_metadata("shard", shard.to_string()))
            }
        }
        // ClusterSingleton needs the distributed lock, handled by the caller.
        RoutingAttribute::ClusterSingleton => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catga_core::Metadata;

    #[test]
    fn solo_role_passes_every_check() {
        let role = StaticClusterRole::solo();
        assert!(check_routing(&RoutingAttribute::LeaderOnly, &role, &Metadata::new()).is_ok());
        assert!(check_routing(&RoutingAttribute::Sharded { key_expr: "orderId".into() }, &role, &Metadata::new()).is_ok());
    }

    #[test]
    fn non_leader_rejects_leader_only() {
        let role = StaticClusterRole::new(false, 1, vec![0]);
        let err = check_routing(&RoutingAttribute::LeaderOnly, &role, &Metadata::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotLeader);
    }

    #[test]
    fn shard_resolution_is_deterministic() {
        let meta = Metadata::single("orderId", "O-42");
        let a = shard_for("orderId", &meta, 8);
        let b = shard_for("orderId", &meta, 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn unowned_shard_is_rejected() {
        let role = StaticClusterRole::new(true, 4, vec![0, 1]);
        let meta = Metadata::single("orderId", "O-1");
        let shard = shard_for("orderId", &meta, 4);
        let result = check_routing(&RoutingAttribute::Sharded { key_expr: "orderId".into() }, &role, &meta);
        if role.owns_shard(shard) {
            assert!(result.is_ok());
        } else {
            assert!(result.is_err());
        }
    }
}
