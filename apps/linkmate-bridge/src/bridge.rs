//! Bridge event loop: device sensors out, virtual entity changes in.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use linkmate_device_state::{Collector, DeviceState, ScreenControl};
use linkmate_ha_connection::{HaClient, VirtualEntities, VirtualKind};
use linkmate_protocol::EntityState;

use crate::config::BridgeConfig;

/// Runs until ctrl-c or a terminal authentication failure.
pub async fn run(config: BridgeConfig, client: HaClient) -> anyhow::Result<()> {
    let virtuals = VirtualEntities::for_device(&config.device_id);
    let control = ScreenControl::new();

    let mut updates = client.entity_state_updates();
    let mut status = client.connection_status();
    let mut auth_error = client.auth_error();

    client.connect(&config.base_url, &config.access_token).await?;
    tracing::info!(url = %config.base_url, device = %config.device_id, "connecting to hub");

    let (device_tx, mut device_rx) = mpsc::channel::<DeviceState>(4);
    let collector = Collector::with_control(
        Box::new(move |state| {
            if device_tx.try_send(state).is_err() {
                tracing::debug!("device state dropped, previous report still pending");
            }
        }),
        control.clone(),
    );
    collector.start(config.report_interval).await;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down bridge");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let connected = *status.borrow_and_update();
                tracing::info!(connected, "hub connection status changed");
                if connected {
                    tokio::spawn(log_snapshot(client.clone()));
                }
            }
            changed = auth_error.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let error = auth_error.borrow_and_update().clone();
                if let Some(message) = error {
                    break Err(anyhow::anyhow!("hub rejected the access token: {message}"));
                }
            }
            update = updates.recv() => match update {
                Ok(state) => on_entity_update(&virtuals, &control, &state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "entity updates lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            Some(state) = device_rx.recv() => {
                if client.is_connected() {
                    let client = client.clone();
                    let device_id = config.device_id.clone();
                    let device_name = config.device_name.clone();
                    tokio::spawn(async move {
                        report_device_state(&client, &device_id, &device_name, &state).await;
                    });
                } else {
                    tracing::debug!("hub not connected, skipping device report");
                }
            }
        }
    };

    collector.stop().await;
    client.disconnect().await;
    result
}

/// A change the hub asked the device to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScreenCommand {
    Brightness(u8),
    KeepAwake(bool),
}

/// Maps a virtual entity's state to the screen change it requests.
fn screen_command(virtuals: &VirtualEntities, state: &EntityState) -> Option<ScreenCommand> {
    match (virtuals.kind_of(&state.entity_id)?, state.state.as_str()) {
        (VirtualKind::BrightnessLight, "on") => state.brightness().map(ScreenCommand::Brightness),
        (VirtualKind::BrightnessLight, "off") => Some(ScreenCommand::Brightness(0)),
        (VirtualKind::KeepAwakeSwitch, "on") => Some(ScreenCommand::KeepAwake(true)),
        (VirtualKind::KeepAwakeSwitch, "off") => Some(ScreenCommand::KeepAwake(false)),
        _ => None,
    }
}

fn on_entity_update(virtuals: &VirtualEntities, control: &ScreenControl, state: &EntityState) {
    if !virtuals.contains(&state.entity_id) {
        tracing::trace!(entity_id = %state.entity_id, state = %state.state, "entity changed");
        return;
    }
    tracing::info!(
        entity_id = %state.entity_id,
        state = %state.state,
        brightness = ?state.brightness(),
        synthesized = state.is_synthesized(),
        "virtual entity changed"
    );

    match screen_command(virtuals, state) {
        Some(ScreenCommand::Brightness(level)) => {
            if let Err(e) = control.set_brightness(level) {
                tracing::warn!(level, error = %e, "failed to set screen brightness");
            }
        }
        Some(ScreenCommand::KeepAwake(on)) => {
            control.set_keep_awake(on);
        }
        None => tracing::warn!(
            entity_id = %state.entity_id,
            state = %state.state,
            "virtual entity state carries no usable command"
        ),
    }
}

async fn log_snapshot(client: HaClient) {
    let fetch = client.try_request_full_state_snapshot();
    match tokio::time::timeout(Duration::from_secs(30), fetch).await {
        Ok(Ok(states)) => {
            tracing::info!(
                entities = states.len(),
                domains = ?count_by_domain(&states),
                "received hub state snapshot"
            );
        }
        Ok(Err(e)) => tracing::warn!(error = %e, "state snapshot failed"),
        Err(_) => tracing::warn!("state snapshot timed out"),
    }
}

/// Pushes every device sensor; returns how many the hub accepted.
async fn report_device_state(
    client: &HaClient,
    device_id: &str,
    device_name: &str,
    state: &DeviceState,
) -> usize {
    let mut accepted = 0;
    for sensor in state.to_sensor_reports(device_id, device_name) {
        if client.push_state(&sensor.entity_id, sensor.report).await {
            accepted += 1;
        }
    }
    tracing::debug!(accepted, "device sensors reported");
    accepted
}

fn count_by_domain(states: &[EntityState]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for state in states {
        *counts.entry(state.domain()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkmate_protocol::Attributes;

    #[test]
    fn snapshot_is_counted_per_domain() {
        let states = vec![
            EntityState::synthesized("light.kitchen", "on", Attributes::new()),
            EntityState::synthesized("light.hall", "off", Attributes::new()),
            EntityState::synthesized("sensor.temp", "21.5", Attributes::new()),
        ];
        let counts = count_by_domain(&states);
        assert_eq!(counts.get("light"), Some(&2));
        assert_eq!(counts.get("sensor"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn empty_snapshot_has_no_domains() {
        assert!(count_by_domain(&[]).is_empty());
    }

    fn light(state: &str, brightness: Option<u8>) -> EntityState {
        let mut attributes = Attributes::new();
        if let Some(b) = brightness {
            attributes.insert("brightness".into(), serde_json::json!(b));
        }
        EntityState::synthesized("light.tab_screen_brightness", state, attributes)
    }

    #[test]
    fn brightness_light_maps_to_levels() {
        let virtuals = VirtualEntities::for_device("tab");
        assert_eq!(
            screen_command(&virtuals, &light("on", Some(128))),
            Some(ScreenCommand::Brightness(128))
        );
        assert_eq!(
            screen_command(&virtuals, &light("off", None)),
            Some(ScreenCommand::Brightness(0))
        );
        assert_eq!(screen_command(&virtuals, &light("on", None)), None);
    }

    #[test]
    fn keep_awake_switch_updates_control() {
        let virtuals = VirtualEntities::for_device("tab");
        let control = ScreenControl::new();

        let on = EntityState::synthesized("switch.tab_keep_screen_on", "on", Attributes::new());
        on_entity_update(&virtuals, &control, &on);
        assert!(control.keep_awake());

        let off = EntityState::synthesized("switch.tab_keep_screen_on", "off", Attributes::new());
        on_entity_update(&virtuals, &control, &off);
        assert!(!control.keep_awake());
    }

    #[test]
    fn other_entities_are_ignored() {
        let virtuals = VirtualEntities::for_device("tab");
        let control = ScreenControl::new();
        let state = EntityState::synthesized("switch.kitchen", "on", Attributes::new());
        assert_eq!(screen_command(&virtuals, &state), None);
        on_entity_update(&virtuals, &control, &state);
        assert!(!control.keep_awake());
    }
}
