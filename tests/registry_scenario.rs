// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the registry driven through the in-process broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use relayhub::codec::{JsonCodec, PayloadCodec, PowerRelayCodec};
use relayhub::protocol::{InboundMessage, LocalBroker, MessageHandler, QoS, Transport};
use relayhub::{
    Command, CommandDescriptor, CommandError, Device, DeviceProfile, DeviceProvisioner,
    DeviceRegistry, Error, FaultKind, HubConfig, Parameter, Subscription, TransportError,
};
use tokio::time::timeout;

struct Hub {
    broker: LocalBroker,
    registry: Arc<DeviceRegistry>,
}

impl Hub {
    fn new(config: HubConfig) -> Self {
        let broker = LocalBroker::new();
        let registry = Arc::new(DeviceRegistry::with_capacity(config.broadcast_capacity));
        broker.add_hook(Arc::new(DeviceProvisioner::new(
            Arc::new(broker.clone()),
            Arc::clone(&registry),
            config,
        )));
        Self { broker, registry }
    }

    fn report(&self, id: &str, payload: &[u8]) {
        self.broker
            .publish_from(id, &format!("devices/{id}/state"), payload, false)
            .unwrap();
    }

    /// Counts messages published on a topic.
    fn count_messages(&self, topic: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let handler: MessageHandler = Arc::new(move |_msg: &InboundMessage| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        self.broker.subscribe(topic, handler).unwrap();
        count
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.broker.shutdown();
    }
}

async fn next<T: Clone>(sub: &mut Subscription<T>) -> T {
    timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("stream ended")
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn power(arguments: &[&str]) -> Command {
    Command::new("power", arguments.iter().copied())
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn relay_lifecycle() {
    let hub = Hub::new(HubConfig::default());
    let mut added = hub.registry.subscribe_new_devices();
    let commands = hub.count_messages("devices/dev1/command");

    hub.broker.connect("dev1").unwrap();
    assert_eq!(next(&mut added).await.id().as_str(), "dev1");

    hub.report("dev1", &[120, 2]);
    let state = hub.registry.state("dev1").unwrap();
    assert_eq!(state.get("voltage"), Some("120"));
    assert_eq!(state.get("current"), Some("2"));

    hub.registry.send_command("dev1", &power(&["on"])).unwrap();
    assert_eq!(hub.broker.retained("devices/dev1/command"), Some(vec![0x01]));
    assert_eq!(commands.load(Ordering::SeqCst), 1);

    hub.broker.disconnect("dev1");
    let err = hub.registry.send_command("dev1", &power(&["off"])).unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(ref id) if id.as_str() == "dev1"));
    assert_eq!(commands.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn json_device_lifecycle() {
    let config = HubConfig::default().with_profile(
        "th1",
        DeviceProfile::Json {
            commands: vec![
                CommandDescriptor::new("mode").with_parameter(Parameter::one_of("m", ["eco", "max"])),
            ],
        },
    );
    let hub = Hub::new(config);
    hub.broker.connect("th1").unwrap();

    hub.report("th1", br#"{"temp": 21.5, "heating": true, "label": "hall"}"#);
    let state = hub.registry.state("th1").unwrap();
    assert_eq!(state.get("temp"), Some("21.5"));
    assert_eq!(state.get("heating"), Some("true"));
    assert_eq!(state.get("label"), Some("hall"));

    hub.registry
        .send_command("th1", &Command::new("mode", ["eco"]))
        .unwrap();
    let sent: serde_json::Value =
        serde_json::from_slice(&hub.broker.retained("devices/th1/command").unwrap()).unwrap();
    assert_eq!(sent, serde_json::json!({"name": "mode", "args": ["eco"]}));

    let err = hub
        .registry
        .send_command("th1", &Command::new("mode", ["off"]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Command(CommandError::InvalidArgumentValue { .. })
    ));
}

#[tokio::test]
async fn reconnect_yields_new_device() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    let first = hub.registry.get("dev1").unwrap();

    hub.broker.disconnect("dev1");
    hub.broker.connect("dev1").unwrap();
    let second = hub.registry.get("dev1").unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.state().is_empty());
    assert!(matches!(
        first.send_command(&power(&["on"])),
        Err(Error::DeviceNotFound(_))
    ));
    second.send_command(&power(&["on"])).unwrap();
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn interleaved_adds_and_removes() {
    let hub = Hub::new(HubConfig::default());
    let mut added = 0;
    let mut removed = 0;

    for i in 0..20 {
        hub.broker.connect(&format!("dev{i}")).unwrap();
        added += 1;
        if i % 3 == 0 {
            assert!(hub.broker.disconnect(&format!("dev{}", i / 2)));
            removed += 1;
        }
        assert_eq!(hub.registry.list_devices().len(), added - removed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_sessions_register_every_device() {
    let hub = Hub::new(HubConfig::default());
    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let broker = hub.broker.clone();
            tokio::spawn(async move { broker.connect(&format!("dev{i}")) })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(hub.registry.len(), 50);
    assert_eq!(hub.broker.session_count(), 50);
}

#[tokio::test]
async fn removal_is_idempotent() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    hub.broker.connect("dev2").unwrap();

    assert!(hub.registry.remove_device("dev1"));
    assert!(!hub.registry.remove_device("dev1"));
    assert!(!hub.registry.remove_device("unknown"));
    assert_eq!(hub.registry.len(), 1);
}

#[tokio::test]
async fn failed_provisioning_leaves_registry_unchanged() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    let mut errors = hub.registry.subscribe_errors();

    let err = hub.broker.connect("bad+id").unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::SessionRejected { .. })
    ));
    assert!(!hub.broker.is_connected("bad+id"));
    let ids: Vec<String> = hub
        .registry
        .list_devices()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, ["dev1"]);
    assert_eq!(next(&mut errors).await.kind, FaultKind::Provisioning);
}

#[tokio::test]
async fn relay_ends_with_device() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    hub.broker.connect("dev2").unwrap();
    assert_eq!(hub.registry.relay_count(), 2);

    hub.broker.disconnect("dev1");
    hub.broker.disconnect("dev2");

    wait_until(|| hub.registry.relay_count() == 0).await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn invalid_command_publishes_nothing() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    let commands = hub.count_messages("devices/dev1/command");

    let err = hub
        .registry
        .send_command("dev1", &power(&["on", "extra"]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Command(CommandError::InvalidArgumentCount {
            expected: 1,
            actual: 2,
            ..
        })
    ));

    let err = hub
        .registry
        .send_command("dev1", &Command::new("reboot", [""; 0]))
        .unwrap_err();
    assert!(matches!(err, Error::Command(CommandError::UnknownCommand(_))));

    assert_eq!(commands.load(Ordering::SeqCst), 0);
    assert_eq!(hub.broker.retained("devices/dev1/command"), None);
}

#[test]
fn codecs_round_trip_their_command_tables() {
    let relay = PowerRelayCodec::new();
    for command in [power(&["on"]), power(&["off"])] {
        let bytes = relay.encode_command(&command).unwrap();
        assert_eq!(relay.decode_command(&bytes).unwrap(), command);
    }

    let json = JsonCodec::new(vec![
        CommandDescriptor::new("reset"),
        CommandDescriptor::new("mode").with_parameter(Parameter::one_of("m", ["eco", "max"])),
        CommandDescriptor::new("label").with_parameter(Parameter::any("text")),
    ]);
    for command in [
        Command::new("reset", [""; 0]),
        Command::new("mode", ["max"]),
        Command::new("label", ["front door"]),
    ] {
        let bytes = json.encode_command(&command).unwrap();
        assert_eq!(json.decode_command(&bytes).unwrap(), command);
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn decode_faults_reach_registry() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    hub.report("dev1", &[120, 2]);
    let mut errors = hub.registry.subscribe_errors();

    hub.report("dev1", &[1, 2, 3]);

    let fault = next(&mut errors).await;
    assert_eq!(fault.kind, FaultKind::Decode);
    assert_eq!(fault.device_id.as_str(), "dev1");
    assert_eq!(hub.registry.state("dev1").unwrap().get("voltage"), Some("120"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_is_current_when_notified() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    let device = hub.registry.get("dev1").unwrap();
    let mut changes = device.subscribe_state_changes();

    let broker = hub.broker.clone();
    let producer = tokio::spawn(async move {
        for voltage in 0..=200u8 {
            broker
                .publish_from("dev1", "devices/dev1/state", &[voltage, 0], false)
                .unwrap();
            tokio::task::yield_now().await;
        }
    });

    loop {
        let notified = next(&mut changes).await;
        let notified: u8 = notified.get("voltage").unwrap().parse().unwrap();
        let current: u8 = device.state().get("voltage").unwrap().parse().unwrap();
        assert!(current >= notified, "state {current} behind notification {notified}");
        if notified == 200 {
            break;
        }
    }
    producer.await.unwrap();
}

#[tokio::test]
async fn slow_subscriber_does_not_stall_fast_one() {
    let hub = Hub::new(HubConfig::default().with_broadcast_capacity(4));
    hub.broker.connect("dev1").unwrap();
    let mut fast = hub.registry.subscribe_state_changes();
    let mut slow = hub.registry.subscribe_state_changes();

    for voltage in 0..20u8 {
        hub.report("dev1", &[voltage, 1]);
        let device = next(&mut fast).await;
        assert_eq!(device.id().as_str(), "dev1");
    }

    assert!(slow.try_recv().is_some());
    assert!(slow.skipped() > 0);
    assert_eq!(fast.skipped(), 0);
}

#[tokio::test]
async fn state_subscribers_receive_the_device() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    hub.broker.connect("dev2").unwrap();
    let mut changes = hub.registry.subscribe_state_changes();

    hub.report("dev2", &[230, 5]);

    let device = next(&mut changes).await;
    assert_eq!(device.id().as_str(), "dev2");
    assert_eq!(device.state().get("voltage"), Some("230"));
}

#[tokio::test]
async fn inline_publish_does_not_touch_devices() {
    let hub = Hub::new(HubConfig::default());
    hub.broker.connect("dev1").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MessageHandler = Arc::new(move |msg: &InboundMessage| {
        sink.lock().push(msg.client_id.clone());
    });
    hub.broker.subscribe("devices/+/command", handler).unwrap();

    hub.registry.send_command("dev1", &power(&["off"])).unwrap();
    hub.broker
        .publish("devices/dev1/command", &[0x01], false, QoS::AtMostOnce)
        .unwrap();

    assert_eq!(*seen.lock(), ["inline", "inline"]);
    assert!(hub.registry.state("dev1").unwrap().is_empty());
}
