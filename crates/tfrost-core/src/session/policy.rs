//! Protocol configuration and fault policies

use crate::keygen::Fault;
use crate::{Error, ParticipantId, Result, SessionId};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default per-round deadline
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(crate::DEFAULT_ROUND_TIMEOUT_SECS);

/// What DKG does once a dealer is accused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DkgFaultPolicy {
    /// Every participant aborts with the first accused dealer's error
    #[default]
    Abort,
    /// Accused dealers are dropped from the qualified set; the DKG completes
    /// when at least `t` dealers remain
    ExcludeFaulty,
}

impl fmt::Display for DkgFaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DkgFaultPolicy::Abort => write!(f, "abort"),
            DkgFaultPolicy::ExcludeFaulty => write!(f, "exclude-faulty"),
        }
    }
}

impl FromStr for DkgFaultPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(DkgFaultPolicy::Abort),
            "exclude-faulty" | "exclude_faulty" | "exclude" => Ok(DkgFaultPolicy::ExcludeFaulty),
            other => Err(Error::Configuration(format!(
                "Unknown DKG fault policy: {}",
                other
            ))),
        }
    }
}

/// How long a detected fault follows a participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// Faults are recorded but later sessions may include the participant
    #[default]
    SessionLocal,
    /// A faulted participant is refused in later sessions until pardoned
    Ban,
}

impl fmt::Display for ExclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionPolicy::SessionLocal => write!(f, "session-local"),
            ExclusionPolicy::Ban => write!(f, "ban"),
        }
    }
}

impl FromStr for ExclusionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "session-local" | "session_local" | "local" => Ok(ExclusionPolicy::SessionLocal),
            "ban" => Ok(ExclusionPolicy::Ban),
            other => Err(Error::Configuration(format!(
                "Unknown exclusion policy: {}",
                other
            ))),
        }
    }
}

/// Node-wide protocol settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Deadline for each round's messages
    pub round_timeout: Duration,
    pub dkg_fault_policy: DkgFaultPolicy,
    pub exclusion_policy: ExclusionPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            dkg_fault_policy: DkgFaultPolicy::default(),
            exclusion_policy: ExclusionPolicy::default(),
        }
    }
}

/// A fault observed in one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub session_id: SessionId,
    pub fault: Fault,
}

/// Faults observed by this node across sessions
pub struct FaultRegistry {
    policy: ExclusionPolicy,
    history: DashMap<ParticipantId, Vec<FaultRecord>>,
    banned: DashSet<ParticipantId>,
}

impl FaultRegistry {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self {
            policy,
            history: DashMap::new(),
            banned: DashSet::new(),
        }
    }

    pub fn policy(&self) -> ExclusionPolicy {
        self.policy
    }

    /// Record a fault; under [`ExclusionPolicy::Ban`] the culprit is also banned
    pub fn record(&self, session_id: &SessionId, fault: Fault) {
        warn!(
            session_id = %hex::encode(session_id),
            culprit = fault.participant,
            kind = ?fault.kind,
            "Recorded participant fault"
        );
        self.history
            .entry(fault.participant)
            .or_default()
            .push(FaultRecord {
                session_id: *session_id,
                fault,
            });

        if self.policy == ExclusionPolicy::Ban && self.banned.insert(fault.participant) {
            warn!(participant_id = fault.participant, "Participant banned");
        }
    }

    /// Faults recorded against `participant`
    pub fn faults_of(&self, participant: ParticipantId) -> Vec<FaultRecord> {
        self.history
            .get(&participant)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn is_banned(&self, participant: ParticipantId) -> bool {
        self.banned.contains(&participant)
    }

    /// Refuse a participant set that contains a banned participant
    pub fn check(&self, participants: &[ParticipantId]) -> Result<()> {
        match participants.iter().find(|id| self.banned.contains(id)) {
            Some(&id) => Err(Error::Banned(id)),
            None => Ok(()),
        }
    }

    /// Lift a ban; the fault history is kept
    pub fn pardon(&self, participant: ParticipantId) -> bool {
        let lifted = self.banned.remove(&participant).is_some();
        if lifted {
            info!(participant_id = participant, "Participant pardoned");
        }
        lifted
    }
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::new(ExclusionPolicy::default())
    }
}
