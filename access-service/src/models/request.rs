use crate::models::Filter;
use std::fmt;

/// National identity number of the end user whose accesses are resolved.
///
/// `Debug` is redacted; the raw value must not reach logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectId(***)")
    }
}

/// How the subject of a lookup was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequest {
    /// Subject taken from the end user's own introspected token.
    Personal { subject: SubjectId, filter: Filter },
    /// Subject passed explicitly by a trusted system client.
    MachineToMachine { subject: SubjectId, filter: Filter },
}

impl AccessRequest {
    pub fn filter(&self) -> &Filter {
        match self {
            AccessRequest::Personal { filter, .. }
            | AccessRequest::MachineToMachine { filter, .. } => filter,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AccessRequest::Personal { .. } => "personal",
            AccessRequest::MachineToMachine { .. } => "m2m",
        }
    }

    pub fn into_parts(self) -> (SubjectId, Filter) {
        match self {
            AccessRequest::Personal { subject, filter }
            | AccessRequest::MachineToMachine { subject, filter } => (subject, filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_debug_is_redacted() {
        let subject = SubjectId::new("16120101181");
        assert_eq!(format!("{:?}", subject), "SubjectId(***)");
        assert_eq!(subject.as_str(), "16120101181");
    }

    #[test]
    fn test_into_parts() {
        let request = AccessRequest::MachineToMachine {
            subject: SubjectId::new("16120101181"),
            filter: Filter::identity(true),
        };
        assert_eq!(request.kind(), "m2m");
        assert!(request.filter().include_deleted());

        let (subject, filter) = request.into_parts();
        assert_eq!(subject.as_str(), "16120101181");
        assert!(filter.is_identity());
    }
}
