use crate::error::{BanditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default exploration constant, sqrt(2).
pub const DEFAULT_EXPLORATION: f64 = 1.414;

/// Identifies one bandit instance.
///
/// The category-level bandit of a community is keyed by the community alone;
/// the item-level bandit behind a category is keyed by `(community, category)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub community: String,
    pub category: Option<String>,
}

impl InstanceKey {
    pub fn community(community: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            category: None,
        }
    }

    pub fn item(community: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            category: Some(category.into()),
        }
    }

    pub fn is_category_level(&self) -> bool {
        self.category.is_none()
    }

    /// `{community}` or `{community}:{category}`, with each component
    /// percent-encoded so a `:` inside a label cannot collide with the separator.
    pub fn storage_key(&self) -> String {
        let community = urlencoding::encode(&self.community);
        match &self.category {
            Some(category) => format!("{}:{}", community, urlencoding::encode(category)),
            None => community.into_owned(),
        }
    }

    pub fn parse(storage_key: &str) -> Result<Self> {
        let mut parts = storage_key.split(':');
        let community = parts
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BanditError::Configuration(format!("empty key: {storage_key:?}")))?;
        let category = parts.next();
        if parts.next().is_some() {
            return Err(BanditError::Configuration(format!(
                "too many key components: {storage_key:?}"
            )));
        }

        let decode = |raw: &str| {
            urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .map_err(|e| BanditError::Configuration(format!("bad key {storage_key:?}: {e}")))
        };

        Ok(Self {
            community: decode(community)?,
            category: category.map(decode).transpose()?,
        })
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Selection algorithm and its parameters, fixed when an instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum PolicyParams {
    Ucb1 {
        exploration: f64,
    },
    Pucb {
        exploration: f64,
        bias_weight: f64,
        temperature: f64,
        top_n: usize,
    },
}

impl Default for PolicyParams {
    fn default() -> Self {
        PolicyParams::Ucb1 {
            exploration: DEFAULT_EXPLORATION,
        }
    }
}

impl PolicyParams {
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: &str| -> Result<()> { Err(BanditError::InvalidInstance(msg.to_string())) };
        match *self {
            PolicyParams::Ucb1 { exploration } => {
                if !exploration.is_finite() || exploration < 0.0 {
                    return invalid("exploration must be finite and non-negative");
                }
            }
            PolicyParams::Pucb {
                exploration,
                bias_weight,
                temperature,
                top_n,
            } => {
                if !exploration.is_finite() || exploration < 0.0 {
                    return invalid("exploration must be finite and non-negative");
                }
                if !bias_weight.is_finite() {
                    return invalid("bias_weight must be finite");
                }
                if !temperature.is_finite() || temperature < 0.0 {
                    return invalid("temperature must be finite and non-negative");
                }
                if top_n == 0 {
                    return invalid("top_n must be at least 1");
                }
            }
        }
        Ok(())
    }
}

/// Statistical state of one bandit instance.
///
/// Fields are private: every constructor (including deserialization) checks
/// that `arms`, `counts` and `rewards` line up and that arm ids are unique,
/// and `total_pulls` is always derived from `counts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InstanceRecord")]
pub struct InstanceState {
    arms: Vec<String>,
    counts: Vec<u64>,
    rewards: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bias: Option<Vec<f64>>,
    policy: PolicyParams,
    version: u64,
    #[serde(skip)]
    total_pulls: u64,
}

/// Wire form of [`InstanceState`] before validation.
#[derive(Deserialize)]
struct InstanceRecord {
    arms: Vec<String>,
    counts: Vec<u64>,
    rewards: Vec<f64>,
    #[serde(default)]
    bias: Option<Vec<f64>>,
    #[serde(default)]
    policy: PolicyParams,
    #[serde(default)]
    version: u64,
}

impl TryFrom<InstanceRecord> for InstanceState {
    type Error = BanditError;

    fn try_from(record: InstanceRecord) -> Result<Self> {
        InstanceState::from_parts(
            record.arms,
            record.counts,
            record.rewards,
            record.bias,
            record.policy,
            record.version,
        )
    }
}

impl InstanceState {
    /// Zero-initialized instance over a fixed arm list.
    pub fn new(arms: Vec<String>, policy: PolicyParams) -> Result<Self> {
        let n = arms.len();
        Self::from_parts(arms, vec![0; n], vec![0.0; n], None, policy, 0)
    }

    pub fn from_parts(
        arms: Vec<String>,
        counts: Vec<u64>,
        rewards: Vec<f64>,
        bias: Option<Vec<f64>>,
        policy: PolicyParams,
        version: u64,
    ) -> Result<Self> {
        if arms.is_empty() {
            return Err(BanditError::InvalidInstance("instance has no arms".into()));
        }
        if counts.len() != arms.len() || rewards.len() != arms.len() {
            return Err(BanditError::InvalidInstance(format!(
                "length mismatch: {} arms, {} counts, {} rewards",
                arms.len(),
                counts.len(),
                rewards.len()
            )));
        }
        if let Some(bias) = &bias {
            if bias.len() != arms.len() {
                return Err(BanditError::InvalidInstance(format!(
                    "length mismatch: {} arms, {} bias entries",
                    arms.len(),
                    bias.len()
                )));
            }
            if bias.iter().any(|b| !b.is_finite()) {
                return Err(BanditError::InvalidInstance("non-finite bias".into()));
            }
        }
        if rewards.iter().any(|r| !r.is_finite()) {
            return Err(BanditError::InvalidInstance("non-finite reward".into()));
        }

        let mut seen = HashSet::with_capacity(arms.len());
        if let Some(dup) = arms.iter().find(|arm| !seen.insert(arm.as_str())) {
            return Err(BanditError::InvalidInstance(format!("duplicate arm {dup}")));
        }

        policy.validate()?;

        let total_pulls = counts.iter().sum();
        Ok(Self {
            arms,
            counts,
            rewards,
            bias,
            policy,
            version,
            total_pulls,
        })
    }

    pub fn with_bias(self, bias: Vec<f64>) -> Result<Self> {
        Self::from_parts(
            self.arms,
            self.counts,
            self.rewards,
            Some(bias),
            self.policy,
            self.version,
        )
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn arms(&self) -> &[String] {
        &self.arms
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn bias(&self) -> Option<&[f64]> {
        self.bias.as_deref()
    }

    pub fn bias_at(&self, index: usize) -> f64 {
        self.bias
            .as_ref()
            .and_then(|b| b.get(index).copied())
            .unwrap_or(0.0)
    }

    pub fn policy(&self) -> PolicyParams {
        self.policy
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn arm_index(&self, arm: &str) -> Option<usize> {
        self.arms.iter().position(|a| a == arm)
    }

    pub fn mean_reward(&self, index: usize) -> Option<f64> {
        match self.counts.get(index) {
            Some(&count) if count > 0 => Some(self.rewards[index] / count as f64),
            _ => None,
        }
    }

    /// Callers validate `index` and `reward` first.
    pub(crate) fn apply_reward(&mut self, index: usize, reward: f64) {
        self.counts[index] += 1;
        self.rewards[index] += reward;
        self.total_pulls = self.counts.iter().sum();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BanditError::InvalidInstance(e.to_string()))
    }
}

/// Two-level recommendation: a category and an item inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub community: String,
    pub category: String,
    pub item: String,
}

/// One ranked category with its ranked items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecommendations {
    pub category: String,
    pub items: Vec<String>,
}

/// Upstream ranking tuple consumed by the arm generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedInteraction {
    pub community: String,
    pub category: String,
    #[serde(alias = "item")]
    pub item_id: String,
    pub rank_score: f64,
}

impl RankedInteraction {
    pub fn new(
        community: impl Into<String>,
        category: impl Into<String>,
        item_id: impl Into<String>,
        rank_score: f64,
    ) -> Self {
        Self {
            community: community.into(),
            category: category.into(),
            item_id: item_id.into(),
            rank_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arms(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(InstanceKey::community("zbMATH").storage_key(), "zbMATH");
        assert_eq!(
            InstanceKey::item("beopen", "Fuel efficiency").storage_key(),
            "beopen:Fuel%20efficiency"
        );
    }

    #[test]
    fn test_storage_key_escapes_separator() {
        let nested = InstanceKey::item("a", "b");
        let colon_community = InstanceKey::community("a:b");
        assert_ne!(nested.storage_key(), colon_community.storage_key());
        assert_eq!(
            InstanceKey::parse(&colon_community.storage_key()).unwrap(),
            colon_community
        );
        assert_eq!(InstanceKey::parse(&nested.storage_key()).unwrap(), nested);
    }

    #[test]
    fn test_parse_rejects_extra_components() {
        assert!(InstanceKey::parse("a:b:c").is_err());
        assert!(InstanceKey::parse("").is_err());
    }

    #[test]
    fn test_new_instance_is_zeroed() {
        let state = InstanceState::new(arms(&["A", "B", "C"]), PolicyParams::default()).unwrap();
        assert_eq!(state.counts(), &[0, 0, 0]);
        assert_eq!(state.rewards(), &[0.0, 0.0, 0.0]);
        assert_eq!(state.total_pulls(), 0);
        assert_eq!(state.version(), 0);
        assert_eq!(state.bias_at(1), 0.0);
    }

    #[test]
    fn test_duplicate_arms_rejected() {
        let err = InstanceState::new(arms(&["A", "B", "A"]), PolicyParams::default()).unwrap_err();
        assert!(matches!(err, BanditError::InvalidInstance(_)));
    }

    #[test]
    fn test_empty_arm_list_rejected() {
        assert!(InstanceState::new(Vec::new(), PolicyParams::default()).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = InstanceState::from_parts(
            arms(&["A", "B"]),
            vec![1],
            vec![0.0, 0.0],
            None,
            PolicyParams::default(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, BanditError::InvalidInstance(_)));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = PolicyParams::Pucb {
            exploration: 1.0,
            bias_weight: 0.5,
            temperature: 0.1,
            top_n: 0,
        };
        assert!(InstanceState::new(arms(&["A"]), policy).is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let state = InstanceState::from_parts(
            arms(&["A", "B"]),
            vec![3, 1],
            vec![2.0, 0.5],
            Some(vec![0.1, 0.0]),
            PolicyParams::Pucb {
                exploration: 2.0,
                bias_weight: 0.5,
                temperature: 0.2,
                top_n: 2,
            },
            7,
        )
        .unwrap();

        let decoded = InstanceState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.total_pulls(), 4);
    }

    #[test]
    fn test_minimal_record_loads_with_defaults() {
        let raw = r#"{"arms":["x","y"],"counts":[2,1],"rewards":[1.0,0.0],"version":4}"#;
        let state = InstanceState::from_json(raw).unwrap();
        assert_eq!(state.total_pulls(), 3);
        assert_eq!(state.policy(), PolicyParams::default());
        assert!(state.bias().is_none());
        assert_eq!(state.version(), 4);
    }

    #[test]
    fn test_corrupted_record_rejected() {
        let raw = r#"{"arms":["x","y"],"counts":[2],"rewards":[1.0,0.0],"version":1}"#;
        assert!(InstanceState::from_json(raw).is_err());
    }

    #[test]
    fn test_mean_reward() {
        let state = InstanceState::from_parts(
            arms(&["A", "B"]),
            vec![4, 0],
            vec![1.0, 0.0],
            None,
            PolicyParams::default(),
            0,
        )
        .unwrap();
        assert_eq!(state.mean_reward(0), Some(0.25));
        assert_eq!(state.mean_reward(1), None);
        assert_eq!(state.arm_index("B"), Some(1));
        assert_eq!(state.arm_index("Z"), None);
    }
}
