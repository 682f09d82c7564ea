use std::collections::HashMap;

use civica_contracts::{Candidate, Location, PoliticalParty, Pollster, Survey};
use serde::{Serialize, Serializer, ser::Error as _};
use serde_json::Value;

use crate::Record;

/// A foreign key resolved against its target collection, or the raw key when
/// no record matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Relation<T> {
    Resolved(T),
    Unresolved(String),
}

impl<T> Relation<T> {
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Relation::Resolved(value) => Some(value),
            Relation::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Relation::Resolved(_))
    }
}

fn resolve<T: Clone>(key: &str, index: &HashMap<&str, &T>) -> Relation<T> {
    match index.get(key) {
        Some(found) => Relation::Resolved((*found).clone()),
        None => Relation::Unresolved(key.to_string()),
    }
}

/// Candidate with its party and location joined in.
///
/// Serializes as the candidate document with `political_party` and `location`
/// replaced by the joined value. As a [`Record`] the relation fields still
/// read as their foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateView {
    pub candidate: Candidate,
    pub political_party: Relation<PoliticalParty>,
    pub location: Relation<Location>,
}

impl Record for CandidateView {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some((relation, nested)) = name.split_once('.') {
            return match relation {
                "political_party" => self.political_party.resolved()?.field(nested),
                "location" => self.location.resolved()?.field(nested),
                _ => None,
            };
        }
        self.candidate.field(name)
    }
}

impl Serialize for CandidateView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut doc = serde_json::to_value(&self.candidate).map_err(S::Error::custom)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "political_party".to_string(),
                serde_json::to_value(&self.political_party).map_err(S::Error::custom)?,
            );
            obj.insert(
                "location".to_string(),
                serde_json::to_value(&self.location).map_err(S::Error::custom)?,
            );
        }
        doc.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyView {
    pub survey: Survey,
    pub pollster: Relation<Pollster>,
}

impl Record for SurveyView {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(nested) = name.strip_prefix("pollster.") {
            return self.pollster.resolved()?.field(nested);
        }
        self.survey.field(name)
    }
}

impl Serialize for SurveyView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut doc = serde_json::to_value(&self.survey).map_err(S::Error::custom)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "pollster".to_string(),
                serde_json::to_value(&self.pollster).map_err(S::Error::custom)?,
            );
        }
        doc.serialize(serializer)
    }
}

pub fn join_candidates(
    candidates: &[Candidate],
    parties: &[PoliticalParty],
    locations: &[Location],
) -> Vec<CandidateView> {
    let party_index = parties
        .iter()
        .map(|party| (party.meta.id.as_str(), party))
        .collect::<HashMap<_, _>>();
    let location_index = index_locations(locations);

    candidates
        .iter()
        .map(|candidate| CandidateView {
            candidate: candidate.clone(),
            political_party: resolve(&candidate.political_party, &party_index),
            location: resolve(&candidate.location, &location_index),
        })
        .collect()
}

pub fn join_surveys(surveys: &[Survey], pollsters: &[Pollster]) -> Vec<SurveyView> {
    let pollster_index = pollsters
        .iter()
        .map(|pollster| (pollster.meta.id.as_str(), pollster))
        .collect::<HashMap<_, _>>();

    surveys
        .iter()
        .map(|survey| SurveyView {
            survey: survey.clone(),
            pollster: resolve(&survey.pollster, &pollster_index),
        })
        .collect()
}

/// Last location wins when two share an INE code, as with parties and pollsters.
fn index_locations(locations: &[Location]) -> HashMap<&str, &Location> {
    locations
        .iter()
        .map(|location| (location.ine_code.as_str(), location))
        .collect()
}

/// Outcome of fetching one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionLoad<T> {
    pub loading: bool,
    pub error: Option<String>,
    pub records: Vec<T>,
}

impl<T> Default for CollectionLoad<T> {
    fn default() -> Self {
        Self {
            loading: true,
            error: None,
            records: Vec::new(),
        }
    }
}

impl<T> CollectionLoad<T> {
    pub fn loaded(records: Vec<T>) -> Self {
        Self {
            loading: false,
            error: None,
            records,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            loading: false,
            error: Some(message.into()),
            records: Vec::new(),
        }
    }

    pub fn from_result<E: std::fmt::Display>(result: Result<Vec<T>, E>) -> Self {
        match result {
            Ok(records) => Self::loaded(records),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub candidates: usize,
    pub parties: usize,
    pub locations: usize,
    pub surveys: usize,
    pub pollsters: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElectionSnapshot {
    pub candidates: Vec<CandidateView>,
    pub parties: Vec<PoliticalParty>,
    pub locations: Vec<Location>,
    pub surveys: Vec<SurveyView>,
    pub pollsters: Vec<Pollster>,
    pub stats: SnapshotStats,
    pub loading: bool,
    pub error: Option<String>,
}

impl ElectionSnapshot {
    /// Joins the five collections and folds their load states.
    ///
    /// Loading is the OR of all flags. The error is the first one found in the
    /// order candidates, parties, locations, surveys, pollsters.
    pub fn assemble(
        candidates: CollectionLoad<Candidate>,
        parties: CollectionLoad<PoliticalParty>,
        locations: CollectionLoad<Location>,
        surveys: CollectionLoad<Survey>,
        pollsters: CollectionLoad<Pollster>,
    ) -> Self {
        let loading = candidates.loading
            || parties.loading
            || locations.loading
            || surveys.loading
            || pollsters.loading;
        let error = [
            &candidates.error,
            &parties.error,
            &locations.error,
            &surveys.error,
            &pollsters.error,
        ]
        .into_iter()
        .find_map(|err| err.clone());

        let stats = SnapshotStats {
            candidates: candidates.records.len(),
            parties: parties.records.len(),
            locations: locations.records.len(),
            surveys: surveys.records.len(),
            pollsters: pollsters.records.len(),
        };

        let candidate_views =
            join_candidates(&candidates.records, &parties.records, &locations.records);
        let survey_views = join_surveys(&surveys.records, &pollsters.records);

        Self {
            candidates: candidate_views,
            parties: parties.records,
            locations: locations.records,
            surveys: survey_views,
            pollsters: pollsters.records,
            stats,
            loading,
            error,
        }
    }
}
