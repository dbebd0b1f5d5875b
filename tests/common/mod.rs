//! Common test utilities shared across integration tests.

use chrono::{DateTime, TimeZone, Utc};
use reveil::testing::RecordingHandler;
use reveil::{Alarm, AlarmId, AlarmState, AlarmStore};
use std::time::Duration;

/// 2030-01-`day` at `hour`:`minute` UTC.
pub fn jan(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, day, hour, minute, 0).unwrap()
}

/// Wait for an alarm to reach an expected state, polling storage.
///
/// Polls every 10ms and panics once `timeout` elapses.
pub async fn wait_for_state(
    store: &dyn AlarmStore,
    id: &AlarmId,
    expected: AlarmState,
    timeout: Duration,
) -> Alarm {
    let start = tokio::time::Instant::now();
    loop {
        let alarm = store.get(id).await.unwrap();
        if alarm.state == expected {
            return alarm;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for alarm {} to reach {}, current state: {}",
                id, expected, alarm.state
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `handler` has delivered at least `count` alarms.
pub async fn wait_for_deliveries(handler: &RecordingHandler, count: usize, timeout: Duration) {
    let start = tokio::time::Instant::now();
    loop {
        let delivered = handler.delivery_count().await;
        if delivered >= count {
            return;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} deliveries, got {}",
                count, delivered
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
