//! Build parameters and the commit pin.

use serde::{Deserialize, Serialize};

/// A single `name = value` build parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered build parameters submitted with a build request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(Vec<ParameterValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(ParameterValue::new(name, value));
    }

    /// Value of the first parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Whether a parameter equal in both name and value is present.
    pub fn contains(&self, parameter: &ParameterValue) -> bool {
        self.0.iter().any(|p| p == parameter)
    }

    /// Number of parameters called `name`.
    pub fn count(&self, name: &str) -> usize {
        self.0.iter().filter(|p| p.name == name).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ParameterValue> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = ParameterValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ParameterSet {
    type Item = ParameterValue;
    type IntoIter = std::vec::IntoIter<ParameterValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The exact revision a build checks out.
///
/// Either a literal commit sha or the synthetic merge ref
/// `origin/pr/<id>/merge`, which the source-control fetch step resolves to the
/// speculative merge of the pull request into its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitPin(String);

impl CommitPin {
    pub fn commit(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn merge_ref(pull_id: u64) -> Self {
        Self(format!("origin/pr/{pull_id}/merge"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_set_lookup() {
        let mut params = ParameterSet::new();
        params.push("A", "1");
        params.push("B", "2");
        params.push("A", "3");

        assert_eq!(params.get("A"), Some("1"));
        assert_eq!(params.count("A"), 2);
        assert!(params.contains(&ParameterValue::new("B", "2")));
        assert!(!params.contains(&ParameterValue::new("B", "1")));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_parameter_set_serializes_as_list() {
        let mut params = ParameterSet::new();
        params.push("sha1", "abc123");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!([{"name": "sha1", "value": "abc123"}]));
    }

    #[test]
    fn test_commit_pin_forms() {
        assert_eq!(CommitPin::merge_ref(42).as_str(), "origin/pr/42/merge");
        assert_eq!(CommitPin::commit("abc123").to_string(), "abc123");
    }
}
