/// Idle clock driver: the 10 s heartbeat that redraws the clock while nothing
/// is playing and paces subscription renewal.
use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::debug;

use crate::core::player::PlayerEvent;
use crate::upnp::subscription::{EventSource, SubscriptionManager};

pub const IDLE_PERIOD: Duration = Duration::from_secs(10);

pub struct IdleClockDriver {
    period: Duration,
}

impl IdleClockDriver {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Tick until `shutdown` resolves or the player goes away. Each tick
    /// asks the player to redraw the idle clock, then advances the renewal
    /// counter; renewals therefore run here and never on the player task.
    pub async fn run<S, F>(
        &self,
        manager: &mut SubscriptionManager<S>,
        player_tx: mpsc::Sender<PlayerEvent>,
        shutdown: F,
    ) where
        S: EventSource,
        F: Future<Output = ()>,
    {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Idle clock stopping");
                    break;
                }
                _ = interval.tick() => {
                    if player_tx.send(PlayerEvent::IdleTick).await.is_err() {
                        debug!("Player gone, idle clock stopping");
                        break;
                    }
                    // a slow device must not hold up shutdown
                    tokio::select! {
                        _ = &mut shutdown => {
                            debug!("Idle clock stopping, renewal abandoned");
                            break;
                        }
                        renewed = manager.on_idle_tick() => {
                            if renewed {
                                debug!("Subscriptions renewed");
                            }
                        }
                    }
                }
            }
        }
    }
}
