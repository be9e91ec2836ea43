//! WiFi station task: drives the radio and feeds events to the link supervisor.

use alloc::string::String;

use embassy_futures::select::{select, Either};
use embassy_net::{Runner, Stack};
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent};

use crate::config::TAG;
use crate::link::{LinkState, LinkSupervisor, Reconnect};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

/// Associate, wait for a lease, wait for the drop, repeat until the
/// supervisor gives up. Then stop the radio and exit.
#[embassy_executor::task]
pub async fn connection(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    link: &'static LinkSupervisor,
    ssid: &'static str,
    password: &'static str,
) {
    log::info!(target: TAG, "wifi: station mode, ssid=\"{}\"", ssid);

    while link.state() != LinkState::PermanentlyFailed {
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(String::from(ssid))
                    .with_password(String::from(password)),
            );
            if let Err(e) = controller.set_config(&client_config) {
                log::error!(target: TAG, "wifi: set_config failed: {:?}", e);
                if !settle(link).await {
                    break;
                }
                continue;
            }
            if let Err(e) = controller.start_async().await {
                log::error!(target: TAG, "wifi: start failed: {:?}", e);
                if !settle(link).await {
                    break;
                }
                continue;
            }
        }

        log::info!(target: TAG, "wifi: connecting (attempt {})", link.retries() + 1);
        match controller.connect_async().await {
            Ok(()) => {
                let lease = select(
                    stack.wait_config_up(),
                    controller.wait_for_event(WifiEvent::StaDisconnected),
                )
                .await;
                match lease {
                    Either::First(()) => {
                        if let Some(cfg) = stack.config_v4() {
                            log::info!(target: TAG, "wifi: got ip {}", cfg.address.address());
                        }
                        link.on_got_ip();
                        controller.wait_for_event(WifiEvent::StaDisconnected).await;
                        log::warn!(target: TAG, "wifi: station disconnected");
                    }
                    Either::Second(()) => {
                        log::warn!(target: TAG, "wifi: disconnected before lease");
                    }
                }
            }
            Err(e) => log::warn!(target: TAG, "wifi: connect failed: {:?}", e),
        }

        if !settle(link).await {
            break;
        }
    }

    if let Err(e) = controller.stop_async().await {
        log::warn!(target: TAG, "wifi: stop failed: {:?}", e);
    }
    log::error!(target: TAG, "wifi: giving up, radio stopped");
}

/// Report the drop. `false` once the retry budget is spent.
async fn settle(link: &LinkSupervisor) -> bool {
    match link.on_disconnected() {
        Reconnect::GiveUp => false,
        Reconnect::Retry { .. } | Reconnect::Ignored => {
            Timer::after(RECONNECT_DELAY).await;
            true
        }
    }
}
