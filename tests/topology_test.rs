use async_trait::async_trait;
use scene_split::{
    WorkerId,
    data_structures::routing::{
        ChannelHandle, DeliveryFilter, FilterScheme, QueueHandle, RoutingPlan,
    },
    error::{BrokerError, TopologyError},
    topology::{Broker, MemoryBroker, TopologyBuilder, channel_name, queue_name},
};

const SCENE: &str = "sponza";

fn ordinals(ids: &[u32]) -> Vec<WorkerId> {
    ids.iter().map(|n| WorkerId::Ordinal(*n)).collect()
}

fn queue(plan: &RoutingPlan, id: WorkerId) -> &QueueHandle {
    &plan.route(id).expect("route").queue
}

#[tokio::test]
async fn should_give_master_and_every_worker_a_queue() {
    let broker = MemoryBroker::new();

    let plan = TopologyBuilder::new(&broker)
        .build(SCENE, ordinals(&[1, 2]))
        .await
        .unwrap();

    let ids: Vec<_> = plan.routes.keys().copied().collect();
    assert_eq!(ids, [WorkerId::Master, WorkerId::Ordinal(1), WorkerId::Ordinal(2)]);
    assert!(plan.is_complete());
    assert_eq!(broker.channel_count(), 1);
    assert_eq!(broker.queue_count(), 3);
    assert_eq!(broker.subscription_count(), 3);
    assert_eq!(plan.channel, ChannelHandle("mem:channel:sponza-topic".to_string()));
    assert_eq!(
        queue(&plan, WorkerId::Ordinal(2)),
        &QueueHandle("mem:queue:sponza-2-queue".to_string())
    );
}

#[tokio::test]
async fn should_filter_master_and_worker_queues_differently() {
    let broker = MemoryBroker::new();

    let plan = TopologyBuilder::new(&broker)
        .build(SCENE, ordinals(&[1, 2]))
        .await
        .unwrap();

    let master = &plan.routes[&WorkerId::Master].filter;
    assert!(master.matches("master"));
    assert!(!master.matches("ALL"));
    for id in ordinals(&[1, 2]) {
        let filter = &plan.routes[&id].filter;
        assert!(filter.matches("ALL"));
        assert!(!filter.matches("master"));
        assert!(!filter.matches(&id.to_string()));
    }
    assert_eq!(
        plan.routes[&WorkerId::Ordinal(1)].filter.to_policy_json(),
        serde_json::json!({ "target": ["ALL"] })
    );
}

#[tokio::test]
async fn should_deliver_broadcasts_to_workers_only() {
    let broker = MemoryBroker::new();
    let plan = TopologyBuilder::new(&broker)
        .build(SCENE, ordinals(&[1, 2]))
        .await
        .unwrap();

    assert_eq!(broker.publish(&plan.channel, "ALL", "start"), 2);
    assert_eq!(broker.publish(&plan.channel, "master", "tile done"), 1);
    assert_eq!(broker.publish(&plan.channel, "1", "just you"), 0);

    let master = broker.drain(queue(&plan, WorkerId::Master));
    assert_eq!(master.len(), 1);
    assert_eq!(master[0].body, "tile done");
    for id in ordinals(&[1, 2]) {
        let messages = broker.drain(queue(&plan, id));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tag, "ALL");
    }
}

#[tokio::test]
async fn should_address_workers_directly_when_configured() {
    let broker = MemoryBroker::new();
    let plan = TopologyBuilder::new(&broker)
        .with_scheme(FilterScheme::BroadcastAndDirect)
        .build(SCENE, ordinals(&[1, 2]))
        .await
        .unwrap();

    assert_eq!(broker.publish(&plan.channel, "2", "just you"), 1);
    assert_eq!(broker.drain(queue(&plan, WorkerId::Ordinal(2))).len(), 1);
    assert!(broker.drain(queue(&plan, WorkerId::Ordinal(1))).is_empty());
    assert!(!plan.routes[&WorkerId::Master].filter.matches("ALL"));
}

#[tokio::test]
async fn should_isolate_a_failing_queue() {
    let broker = MemoryBroker::new();
    broker.fail_queue(&queue_name(SCENE, WorkerId::Ordinal(2)));

    let plan = TopologyBuilder::new(&broker)
        .with_concurrency(1)
        .build(SCENE, ordinals(&[1, 2]))
        .await
        .unwrap();

    let ids: Vec<_> = plan.routes.keys().copied().collect();
    assert_eq!(ids, [WorkerId::Master, WorkerId::Ordinal(1)]);
    assert!(plan.failures.contains_key(&WorkerId::Ordinal(2)));
    assert!(!plan.is_complete());
}

#[tokio::test]
async fn should_converge_when_built_twice() {
    let broker = MemoryBroker::new();
    let builder = TopologyBuilder::new(&broker);

    let first = builder.build(SCENE, ordinals(&[1, 2])).await.unwrap();
    let second = builder.build(SCENE, ordinals(&[1, 2])).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(broker.queue_count(), 3);
    assert_eq!(broker.subscription_count(), 3);
    assert_eq!(broker.publish(&first.channel, "ALL", "once"), 2);
}

#[tokio::test]
async fn should_reuse_handles_reported_as_existing() {
    let broker = MemoryBroker::strict();
    let builder = TopologyBuilder::new(&broker);

    let first = builder.build(SCENE, ordinals(&[1])).await.unwrap();
    let second = builder.build(SCENE, ordinals(&[1])).await.unwrap();

    assert!(second.is_complete(), "{:?}", second.failures);
    assert_eq!(first.routes, second.routes);
}

#[tokio::test]
async fn should_only_accept_deliveries_from_its_own_channel() {
    let broker = MemoryBroker::new();
    let plan = TopologyBuilder::new(&broker)
        .build(SCENE, ordinals(&[1]))
        .await
        .unwrap();
    let stranger = broker.create_channel("someone-else").await.unwrap();
    broker
        .subscribe(
            &stranger,
            queue(&plan, WorkerId::Ordinal(1)),
            &DeliveryFilter::new(["ALL"]),
        )
        .await
        .unwrap();

    assert_eq!(broker.publish(&stranger, "ALL", "spam"), 0);
    assert!(broker.drain(queue(&plan, WorkerId::Ordinal(1))).is_empty());
}

struct NoChannels;

#[async_trait]
impl Broker for NoChannels {
    async fn create_channel(&self, name: &str) -> Result<ChannelHandle, BrokerError> {
        Err(BrokerError::Rejected(format!("no room for {name}")))
    }

    async fn create_queue(&self, name: &str) -> Result<QueueHandle, BrokerError> {
        Ok(QueueHandle(name.to_string()))
    }

    async fn subscribe(
        &self,
        _: &ChannelHandle,
        _: &QueueHandle,
        _: &DeliveryFilter,
    ) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn set_queue_access_policy(
        &self,
        _: &QueueHandle,
        _: &ChannelHandle,
    ) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[tokio::test]
async fn should_fail_when_channel_cannot_be_created() {
    let result = TopologyBuilder::new(&NoChannels)
        .build(SCENE, ordinals(&[1]))
        .await;

    match result {
        Err(TopologyError::Channel { name, .. }) => assert_eq!(name, channel_name(SCENE)),
        other => panic!("expected a channel error, got {other:?}"),
    }
}
