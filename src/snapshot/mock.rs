//! In-memory snapshot driver for unit tests
//!
//! Shadows, shares, and junctions live in a mutex-guarded table; every
//! mutating call is appended to an operation journal so tests can assert on
//! release ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{ShadowInfo, SnapshotDriver, TOOL_ORIGINATOR};
use crate::error::{ConvoyError, Result};

#[derive(Default)]
struct MockState {
    next_seq: u32,
    shadows: Vec<ShadowInfo>,
    junctions: Vec<(String, String)>,
    shares: HashMap<(String, String), String>,
    create_failures: VecDeque<String>,
    ops: Vec<String>,
}

#[derive(Default)]
pub struct MockSnapshotDriver {
    state: Mutex<MockState>,
}

impl MockSnapshotDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_share(self, server: &str, share: &str, local_path: &str) -> Self {
        self.state.lock().unwrap().shares.insert(
            (server.to_lowercase(), share.to_lowercase()),
            local_path.to_string(),
        );
        self
    }

    /// Queue an error message for the next create attempts; once drained,
    /// creation succeeds again.
    pub fn script_create_failure(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .push_back(message.to_string());
    }

    /// Insert a pre-existing shadow (for reconcile/retention tests)
    pub fn seed_shadow(
        &self,
        shadow_id: &str,
        volume: &str,
        created_at: DateTime<Utc>,
        originator: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.shadows.push(ShadowInfo {
            shadow_id: shadow_id.to_string(),
            shadow_path: format!("\\\\?\\GLOBALROOT\\Device\\MockShadow{}", shadow_id),
            volume: volume.to_string(),
            created_at,
            originator: originator.map(|s| s.to_string()),
        });
    }

    pub fn shadow_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .shadows
            .iter()
            .map(|s| s.shadow_id.clone())
            .collect()
    }

    pub fn junctions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().junctions.clone()
    }

    /// Journal of mutating operations in call order
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }
}

impl SnapshotDriver for MockSnapshotDriver {
    fn create_shadow(&self, volume: &str, _server: Option<&str>) -> Result<ShadowInfo> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.create_failures.pop_front() {
            state.ops.push(format!("create_shadow_failed:{}", volume));
            return Err(ConvoyError::Snapshot {
                message,
                retryable: false,
            });
        }
        state.next_seq += 1;
        let info = ShadowInfo {
            shadow_id: format!("{{mock-{:04}}}", state.next_seq),
            shadow_path: format!(
                "\\\\?\\GLOBALROOT\\Device\\MockShadow{}",
                state.next_seq
            ),
            volume: volume.to_string(),
            created_at: Utc::now(),
            originator: Some(TOOL_ORIGINATOR.to_string()),
        };
        state.shadows.push(info.clone());
        state.ops.push(format!("create_shadow:{}", info.shadow_id));
        Ok(info)
    }

    fn delete_shadow(&self, shadow_id: &str, _server: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.shadows.len();
        state.shadows.retain(|s| s.shadow_id != shadow_id);
        state.ops.push(format!("delete_shadow:{}", shadow_id));
        if state.shadows.len() == before {
            return Err(ConvoyError::Snapshot {
                message: format!("shadow {} not found", shadow_id),
                retryable: false,
            });
        }
        Ok(())
    }

    fn list_shadows(&self, _server: Option<&str>) -> Result<Vec<ShadowInfo>> {
        Ok(self.state.lock().unwrap().shadows.clone())
    }

    fn resolve_share(&self, server: &str, share: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .shares
            .get(&(server.to_lowercase(), share.to_lowercase()))
            .cloned()
            .ok_or_else(|| ConvoyError::Snapshot {
                message: format!("share {} not found on {}", share, server),
                retryable: false,
            })
    }

    fn create_junction(&self, junction_path: &str, target: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .junctions
            .push((junction_path.to_string(), target.to_string()));
        state.ops.push(format!("create_junction:{}", junction_path));
        Ok(())
    }

    fn remove_junction(&self, junction_path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.junctions.retain(|(path, _)| path != junction_path);
        state.ops.push(format!("remove_junction:{}", junction_path));
        Ok(())
    }
}
