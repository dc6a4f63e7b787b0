//! Chain Registry (C8): the validated, queryable view over configured
//! chains. Built once at startup from the raw config and never mutated
//! afterward — chain definitions are not hot-reloaded.

use indexmap::{IndexMap, IndexSet};
use ingest_domain::{Chain, ChainId, ClientId};

/// Admits only chains with at least one source and at least one target; a
/// chain that fails admission is dropped with a logged warning rather than
/// aborting the whole registry (spec §6: "Only chains with at least one
/// source and at least one target are admitted" is framed as per-chain
/// filtering, not a fatal startup condition).
pub struct ChainRegistry {
    chains: IndexMap<ChainId, Chain>,
    by_source: IndexMap<ClientId, IndexSet<ChainId>>,
}

impl ChainRegistry {
    pub fn build(chains: Vec<Chain>) -> Self {
        let mut by_id = IndexMap::new();
        let mut by_source: IndexMap<ClientId, IndexSet<ChainId>> = IndexMap::new();

        for chain in chains {
            if chain.sources.is_empty() {
                log::warn!("chain '{}' has no sources; dropped", chain.id);
                continue;
            }
            if chain.targets.is_empty() {
                log::warn!("chain '{}' has no targets; dropped", chain.id);
                continue;
            }
            for source in &chain.sources {
                by_source.entry(source.client_id().clone()).or_default().insert(chain.id.clone());
            }
            by_id.insert(chain.id.clone(), chain);
        }

        Self { chains: by_id, by_source }
    }

    /// Chains fed by `client_id`, in the deterministic declaration order
    /// they were registered in (spec §4.5: "iterate chains in declaration
    /// order").
    pub fn chains_for_source(&self, client_id: &str) -> Vec<ChainId> {
        self.by_source.get(client_id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn get_chain(&self, chain_id: &str) -> Option<&Chain> {
        self.chains.get(chain_id)
    }

    pub fn list_chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    /// Source or target client ids referenced by no chain at all — surfaced
    /// as a startup warning, not an error (a client may be provisioned ahead
    /// of the chain that will use it).
    pub fn unused_clients<'a>(&self, all_client_ids: impl Iterator<Item = &'a ClientId>) -> Vec<ClientId> {
        let mut referenced: IndexSet<&ClientId> = IndexSet::new();
        for chain in self.chains.values() {
            for s in &chain.sources {
                referenced.insert(s.client_id());
            }
            for t in &chain.targets {
                referenced.insert(t.client_id());
            }
        }
        all_client_ids.filter(|id| !referenced.contains(id)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_domain::{SourceBinding, TargetBinding};

    fn sample_chain(id: &str, source_client: &str) -> Chain {
        Chain { id: id.to_string(),
                sources: vec![SourceBinding::Broker { client_id: source_client.to_string(), topic: "in/x".to_string() }],
                steps: vec![],
                targets: vec![TargetBinding::Broker { client_id: "out1".to_string(), topic: "out/x".to_string() }] }
    }

    #[test]
    fn drops_chain_with_no_sources_but_keeps_the_rest() {
        let bad = Chain { id: "c1".to_string(),
                           sources: vec![],
                           steps: vec![],
                           targets: vec![TargetBinding::Broker { client_id: "out1".to_string(), topic: "t".to_string() }] };
        let good = sample_chain("c2", "mq1");
        let registry = ChainRegistry::build(vec![bad, good]);
        assert!(registry.get_chain("c1").is_none());
        assert!(registry.get_chain("c2").is_some());
    }

    #[test]
    fn drops_chain_with_no_targets() {
        let chain = Chain { id: "c1".to_string(),
                             sources: vec![SourceBinding::Broker { client_id: "mq1".to_string(), topic: "in/x".to_string() }],
                             steps: vec![],
                             targets: vec![] };
        let registry = ChainRegistry::build(vec![chain]);
        assert!(registry.get_chain("c1").is_none());
        assert!(registry.chains_for_source("mq1").is_empty());
    }

    #[test]
    fn chains_for_source_is_deduplicated_and_ordered() {
        let registry = ChainRegistry::build(vec![sample_chain("c1", "mq1"), sample_chain("c2", "mq1")]);
        assert_eq!(registry.chains_for_source("mq1"), vec!["c1".to_string(), "c2".to_string()]);
        assert!(registry.chains_for_source("ghost").is_empty());
    }

    #[test]
    fn unused_clients_excludes_referenced_ids() {
        let registry = ChainRegistry::build(vec![sample_chain("c1", "mq1")]);
        let all = vec!["mq1".to_string(), "out1".to_string(), "orphan".to_string()];
        let unused = registry.unused_clients(all.iter());
        assert_eq!(unused, vec!["orphan".to_string()]);
    }
}
