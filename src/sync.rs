//! Time-synchronization bridge
//!
//! Owns the mapping between the engine's local monotonic clock and
//! wall/NTP time. Every outbound bundle with a real (non-immediate) time
//! tag gets a release delay so that its timestamp lines up with the audio
//! clock; the offset is recomputed on every transition of the engine
//! clock into the running state, since drift and suspension invalidate a
//! stale value.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;

use crate::codec::{peek_bundle_time, TimeTag, SECONDS_1900_TO_1970};
use crate::config::SyncConfig;
use crate::dispatch::{Dispatcher, OriginId, SendOptions};
use crate::error::{Result, SyncError};

/// Engine clock state as signaled by the audio-engine collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Running,
    Suspended,
}

/// Clock seam: the engine's local monotonic time plus wall time.
///
/// Tests inject deterministic implementations; production uses
/// [`SystemClock`].
pub trait EngineClock: Send + Sync + 'static {
    /// Engine-local monotonic clock in seconds
    fn local_seconds(&self) -> f64;

    /// Wall clock in seconds since the Unix epoch
    fn wall_seconds(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
    }
}

/// Process-lifetime monotonic clock
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineClock for SystemClock {
    fn local_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// The time-sync bridge
pub struct TimeSync {
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn EngineClock>,
    config: SyncConfig,
    offset_tx: watch::Sender<Option<f64>>,
    clock_state: Mutex<ClockState>,
}

impl TimeSync {
    pub fn new(dispatcher: Arc<Dispatcher>, clock: Arc<dyn EngineClock>, config: SyncConfig) -> Self {
        Self {
            dispatcher,
            clock,
            config,
            offset_tx: watch::channel::<Option<f64>>(None).0,
            clock_state: Mutex::new(ClockState::Suspended),
        }
    }

    /// Feed a clock-state signal from the engine.
    ///
    /// Entering the running state recomputes the offset; repeated running
    /// signals are not transitions and leave it alone.
    pub fn clock_state_changed(&self, state: ClockState) {
        let entering_running = {
            let mut prev = self.clock_state.lock();
            let entering = state == ClockState::Running && *prev != ClockState::Running;
            *prev = state;
            entering
        };
        if entering_running {
            self.recompute_offset();
        }
    }

    /// Recompute the local-to-NTP offset from the current clocks
    pub fn recompute_offset(&self) -> f64 {
        let offset =
            SECONDS_1900_TO_1970 as f64 + self.clock.wall_seconds() - self.clock.local_seconds();
        self.offset_tx.send_replace(Some(offset));
        tracing::debug!(offset, "clock offset recomputed");
        offset
    }

    /// The current offset, if one has been computed
    pub fn offset(&self) -> Option<f64> {
        *self.offset_tx.borrow()
    }

    /// Wait for the first offset computation.
    ///
    /// Bounded by the configured `offset_wait`; a clock that never reports
    /// running yields [`SyncError::ClockNeverRan`] instead of parking the
    /// caller forever.
    pub async fn await_offset(&self) -> std::result::Result<f64, SyncError> {
        if let Some(offset) = self.offset() {
            return Ok(offset);
        }

        let mut rx = self.offset_tx.subscribe();
        let wait = self.config.offset_wait();
        tokio::time::timeout(wait, async move {
            loop {
                if let Some(offset) = *rx.borrow_and_update() {
                    return offset;
                }
                if rx.changed().await.is_err() {
                    // Sender side lives as long as self; unreachable in
                    // practice, but don't spin if it ever closes
                    futures_util::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(|_| SyncError::ClockNeverRan {
            waited_ms: wait.as_millis() as u64,
        })
    }

    /// Send a raw payload, deriving a release delay from its time tag.
    ///
    /// Only the first 16 bytes are inspected. Non-bundle payloads and
    /// immediate bundles go out with no delay. If no offset exists yet,
    /// waits a bounded time for the clock to run and then computes one on
    /// demand rather than sending with a wrong or zero offset.
    pub async fn schedule_send(
        &self,
        payload: Bytes,
        origin: OriginId,
        tag: Option<String>,
    ) -> Result<()> {
        let release_delay = match peek_bundle_time(&payload) {
            Some(time) if !time.is_immediate() => {
                let offset = match self.await_offset().await {
                    Ok(offset) => offset,
                    Err(e) => {
                        tracing::warn!("{}; computing offset on demand", e);
                        self.recompute_offset()
                    }
                };
                compute_release_delay(
                    time,
                    offset,
                    self.clock.local_seconds(),
                    self.config.latency_budget(),
                )
            }
            _ => None,
        };

        let options = SendOptions {
            origin,
            tag,
            release_delay,
        };
        self.dispatcher.send_raw(payload, options)
    }
}

/// How long to hold a bundle so its time tag lines up with the audio
/// clock. Past-due bundles (and anything within the latency budget) are
/// released immediately.
fn compute_release_delay(
    time: TimeTag,
    offset: f64,
    local_now: f64,
    latency_budget: Duration,
) -> Option<Duration> {
    let wait = time.ntp_seconds() - offset - local_now - latency_budget.as_secs_f64();
    if wait > 0.0 {
        Some(Duration::from_secs_f64(wait))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_message, encode_packet, Bundle, Message, Packet};
    use crate::config::DispatchConfig;
    use crate::region::{RegionLayout, SharedRegion};
    use crate::transport::LoopbackEngine;

    /// Deterministic clock for offset math
    struct FakeClock {
        local: Mutex<f64>,
        wall: Mutex<f64>,
    }

    impl FakeClock {
        fn new(local: f64, wall: f64) -> Arc<Self> {
            Arc::new(Self {
                local: Mutex::new(local),
                wall: Mutex::new(wall),
            })
        }
    }

    impl EngineClock for FakeClock {
        fn local_seconds(&self) -> f64 {
            *self.local.lock()
        }
        fn wall_seconds(&self) -> f64 {
            *self.wall.lock()
        }
    }

    async fn ready_bridge(
        clock: Arc<FakeClock>,
        sync_config: SyncConfig,
    ) -> (TimeSync, LoopbackEngine) {
        let engine = LoopbackEngine::new();
        let region = SharedRegion::allocate(RegionLayout::default());
        let dispatcher = Arc::new(Dispatcher::new(DispatchConfig::default()));
        dispatcher
            .initialize(engine.transports(), region)
            .await
            .unwrap();
        (TimeSync::new(dispatcher, clock, sync_config), engine)
    }

    #[test]
    fn test_release_delay_math() {
        let offset = SECONDS_1900_TO_1970 as f64 + 1000.0; // wall 1000 at local 0
        let local_now = 5.0;
        // Bundle due one second from now on the local clock
        let time = TimeTag::from_unix(1006.0);

        let delay = compute_release_delay(time, offset, local_now, Duration::from_millis(50));
        let delay = delay.unwrap().as_secs_f64();
        assert!((delay - 0.95).abs() < 1e-3, "delay {}", delay);

        // Past-due bundles release immediately
        let time = TimeTag::from_unix(1004.0);
        assert!(compute_release_delay(time, offset, local_now, Duration::from_millis(50)).is_none());
    }

    #[tokio::test]
    async fn test_offset_recomputed_on_running_transition() {
        let clock = FakeClock::new(10.0, 2000.0);
        let (bridge, _engine) = ready_bridge(clock.clone(), SyncConfig::default()).await;

        assert!(bridge.offset().is_none());
        bridge.clock_state_changed(ClockState::Running);
        let first = bridge.offset().unwrap();
        assert_eq!(first, SECONDS_1900_TO_1970 as f64 + 2000.0 - 10.0);

        // Repeated running signal is not a transition
        *clock.wall.lock() = 2100.0;
        bridge.clock_state_changed(ClockState::Running);
        assert_eq!(bridge.offset().unwrap(), first);

        // Suspend/resume recomputes
        bridge.clock_state_changed(ClockState::Suspended);
        bridge.clock_state_changed(ClockState::Running);
        assert_eq!(
            bridge.offset().unwrap(),
            SECONDS_1900_TO_1970 as f64 + 2100.0 - 10.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_send_holds_future_bundle() {
        let clock = FakeClock::new(0.0, 1000.0);
        let (bridge, engine) = ready_bridge(clock, SyncConfig::default()).await;
        bridge.clock_state_changed(ClockState::Running);

        // Bundle due 2 local-clock seconds out
        let bundle = Bundle::new(
            TimeTag::from_unix(1002.0),
            vec![Message::new("/hit").unwrap().into()],
        );
        let payload = encode_packet(&bundle.into()).unwrap();
        bridge
            .schedule_send(payload, OriginId(1), None)
            .await
            .unwrap();

        // Not yet released: well before the tag minus latency budget
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(engine.drain_control().is_empty());

        // Released by the due time
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let sent = engine.drain_control();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            crate::codec::decode_packet(&sent[0]).unwrap(),
            Packet::Bundle(_)
        ));
    }

    #[tokio::test]
    async fn test_immediate_bundle_and_message_skip_delay() {
        let clock = FakeClock::new(0.0, 1000.0);
        let (bridge, engine) = ready_bridge(clock, SyncConfig::default()).await;
        bridge.clock_state_changed(ClockState::Running);

        let bundle = Bundle::new(
            TimeTag::IMMEDIATE,
            vec![Message::new("/now").unwrap().into()],
        );
        bridge
            .schedule_send(encode_packet(&bundle.into()).unwrap(), OriginId(1), None)
            .await
            .unwrap();

        let message = encode_message(&Message::new("/also/now").unwrap()).unwrap();
        bridge
            .schedule_send(message, OriginId(1), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.drain_control().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_offset_fallback() {
        let clock = FakeClock::new(0.0, 1000.0);
        let config = SyncConfig {
            offset_wait_ms: 50,
            ..SyncConfig::default()
        };
        let (bridge, engine) = ready_bridge(clock, config).await;

        // Clock never reported running; the bounded wait expires and the
        // offset is computed on demand instead of blocking forever
        let bundle = Bundle::new(
            TimeTag::from_unix(1000.5),
            vec![Message::new("/fallback").unwrap().into()],
        );
        bridge
            .schedule_send(encode_packet(&bundle.into()).unwrap(), OriginId(2), None)
            .await
            .unwrap();

        assert!(bridge.offset().is_some());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.drain_control().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_offset_times_out() {
        let clock = FakeClock::new(0.0, 0.0);
        let config = SyncConfig {
            offset_wait_ms: 25,
            ..SyncConfig::default()
        };
        let (bridge, _engine) = ready_bridge(clock, config).await;

        let err = bridge.await_offset().await.unwrap_err();
        assert_eq!(err, SyncError::ClockNeverRan { waited_ms: 25 });
    }
}
