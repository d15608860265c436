//! # Beacon Chain Flows
//!
//! 1. **Producer → follower**: one node produces, a second node validates
//!    every block before signing and inserts it. Both end on identical
//!    best states across the random window and an epoch boundary.
//! 2. **Staker lifecycle**: stake → candidate → pending (epoch random) →
//!    committee (swap), observed through `CommitteeChanged` events.
//! 3. **Draining task**: a spawned task follows inserts through an
//!    `EventStream`.
//! 4. **PDE contributions**: shard metadata instructions become matched
//!    beacon instructions and move pool reserves on commit.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use qc_14_beacon_chain::pde::{Contribution, PdeContributionHandler};
    use qc_14_beacon_chain::test_utils::{
        genesis_block, next_block, shard_block, stake_instruction, GENESIS_TIMESTAMP,
    };
    use qc_14_beacon_chain::{
        BeaconBlock, BeaconChain, BeaconChainApi, BeaconChainDeps, ChainParams,
        CommitteeMembershipVerifier, CommitteeKey, CommitteeRole, DeterministicRandomnessOracle,
        InMemoryBeaconStore, InMemoryShardToBeaconPool, ManualTimeSource,
        RecordingSlashingProcessor, ShardToBeaconBlock,
    };
    use shared_bus::{BeaconEvent, EventFilter, InMemoryEventBus};
    use tokio_stream::StreamExt;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Node {
        chain: BeaconChain,
        pool: Arc<InMemoryShardToBeaconPool>,
        bus: Arc<InMemoryEventBus>,
    }

    impl Node {
        fn new(params: &ChainParams) -> Self {
            Self::with_handler(params, None)
        }

        fn with_handler(
            params: &ChainParams,
            handler: Option<Arc<PdeContributionHandler>>,
        ) -> Self {
            let pool = Arc::new(InMemoryShardToBeaconPool::new());
            let bus = Arc::new(InMemoryEventBus::new());
            let deps = BeaconChainDeps {
                storage: Arc::new(InMemoryBeaconStore::new()),
                pool: pool.clone(),
                oracle: Arc::new(DeterministicRandomnessOracle::new()),
                slashing: Arc::new(RecordingSlashingProcessor::new()),
                verifier: Arc::new(CommitteeMembershipVerifier),
                time_source: Arc::new(ManualTimeSource::new(GENESIS_TIMESTAMP + 60)),
                events: bus.clone(),
                params: params.clone(),
            };
            let mut chain = BeaconChain::new(deps, &genesis_block(params)).unwrap();
            if let Some(handler) = handler {
                chain = chain.with_handler(handler).unwrap();
            }
            Self { chain, pool, bus }
        }

        fn producer(&self) -> CommitteeKey {
            next_block(&self.chain.best_state(), self.chain.params(), vec![])
                .header
                .producer
        }

        async fn produce(&self) -> BeaconBlock {
            self.chain.produce_block(&self.producer(), 0).await.unwrap()
        }
    }

    fn pool_everywhere(nodes: &[&Node], block: ShardToBeaconBlock) {
        for node in nodes {
            node.pool.add_block(block.clone());
        }
    }

    fn key(name: &str) -> CommitteeKey {
        CommitteeKey::parse(name).unwrap()
    }

    // =============================================================================
    // PRODUCER → FOLLOWER
    // =============================================================================

    /// Drive `leader` and `follower` to `height`, adding `extra` shard blocks
    /// to both pools once the leader reaches `extra_at`.
    async fn run_pair(
        leader: &Node,
        follower: &Node,
        height: u64,
        extra_at: u64,
        extra: Vec<ShardToBeaconBlock>,
    ) {
        let mut extra = Some(extra);
        while leader.chain.best_height() < height {
            if leader.chain.best_height() >= extra_at {
                for block in extra.take().unwrap_or_default() {
                    pool_everywhere(&[leader, follower], block);
                }
            }
            let block = leader.produce().await;
            follower
                .chain
                .validate_block_for_signing(&block)
                .await
                .unwrap();
            leader.chain.insert_block(block.clone(), true).await.unwrap();
            follower.chain.insert_block(block, true).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_follower_tracks_producer_across_epoch() {
        let params = ChainParams::for_testing();
        let leader = Node::new(&params);
        let follower = Node::new(&params);
        let mut leader_events = leader.bus.subscribe(EventFilter::all());

        pool_everywhere(
            &[&leader, &follower],
            shard_block(0, 2, vec![stake_instruction(&["n1", "n2"], "shard", true)]),
        );
        pool_everywhere(
            &[&leader, &follower],
            shard_block(1, 2, vec![stake_instruction(&["b1"], "beacon", false)]),
        );

        let random_block = params.random_time + 1;
        run_pair(
            &leader,
            &follower,
            params.epoch + 2,
            random_block,
            vec![shard_block(0, 3, vec![]), shard_block(1, 3, vec![])],
        )
        .await;

        let state = leader.chain.best_state();
        assert_eq!(state, follower.chain.best_state());
        assert_eq!(state.height, params.epoch + 2);
        assert_eq!(state.epoch, 2);

        assert!(leader.chain.role_of(&key("n1")).is_committee_member());
        assert!(leader.chain.role_of(&key("n2")).is_committee_member());
        assert_eq!(leader.chain.role_of(&key("b1")), CommitteeRole::BeaconCommittee);
        assert_eq!(
            leader.chain.beacon_committee().len(),
            params.min_beacon_committee_size + 1
        );

        let changes: Vec<(u64, bool)> = leader_events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                BeaconEvent::CommitteeChanged {
                    height,
                    beacon_changed,
                    ..
                } => Some((height, beacon_changed)),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (random_block, true),
                (random_block + 1, false),
                (params.epoch + 1, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_inserted_events_reach_draining_task() {
        let params = ChainParams::for_testing();
        let node = Node::new(&params);
        let mut stream = node.bus.event_stream(EventFilter::all());

        let drainer = tokio::spawn(async move {
            let mut inserted = Vec::new();
            while let Some(event) = stream.next().await {
                if let BeaconEvent::BeaconBlockInserted {
                    height,
                    block_hash,
                    epoch,
                } = event
                {
                    inserted.push((height, block_hash, epoch));
                    if inserted.len() == 2 {
                        break;
                    }
                }
            }
            inserted
        });

        let mut hashes = Vec::new();
        for _ in 0..2 {
            let block = node.produce().await;
            hashes.push(block.hash());
            node.chain.insert_block(block, false).await.unwrap();
        }

        let inserted = tokio::time::timeout(Duration::from_secs(1), drainer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inserted, vec![(2, hashes[0], 1), (3, hashes[1], 1)]);
    }

    // =============================================================================
    // PDE CONTRIBUTIONS
    // =============================================================================

    fn contribution(token: &str, amount: u64) -> Contribution {
        Contribution {
            pair_id: "pair-1".to_string(),
            token_id: token.to_string(),
            amount,
            contributor: format!("addr-{}", token),
            tx_id: format!("tx-{}", token),
        }
    }

    #[tokio::test]
    async fn test_pde_contributions_match_across_shards() {
        let params = ChainParams::for_testing();
        let handler = Arc::new(PdeContributionHandler::new());
        let node = Node::with_handler(&params, Some(handler.clone()));

        node.pool.add_block(shard_block(
            0,
            2,
            vec![contribution("tokenA", 100).to_request().unwrap()],
        ));
        node.pool.add_block(shard_block(
            1,
            2,
            vec![contribution("tokenB", 200).to_request().unwrap()],
        ));

        let block = node.produce().await;
        let statuses: Vec<&str> = block
            .body
            .instructions
            .iter()
            .filter(|inst| inst[0] == "90")
            .map(|inst| inst[1].as_str())
            .collect();
        assert_eq!(statuses, vec!["waiting", "matched"]);

        // Nothing moves before the block commits.
        assert_eq!(handler.reserves("tokenA", "tokenB"), None);
        node.chain.validate_block_for_signing(&block).await.unwrap();
        node.chain.insert_block(block, true).await.unwrap();
        assert_eq!(handler.reserves("tokenA", "tokenB"), Some((100, 200)));
        assert!(handler.snapshot().waiting.is_empty());
    }
}
