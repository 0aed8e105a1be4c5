//! Server feature negotiation.
//!
//! Probed once when the database service starts; the result never changes
//! afterwards.

use std::collections::BTreeSet;

use serde::Serialize;

use nodal_core::config::GraphConfig;

use crate::query::Quantifier;
use crate::session::{Driver, RemoteError, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// `ANY(x IN list WHERE ...)` list predicates.
    AnyQuantifier,
    SpatialQueries,
    ShowIndexes,
    Authentication,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::AnyQuantifier,
        Feature::SpatialQueries,
        Feature::ShowIndexes,
        Feature::Authentication,
    ];
}

fn probe_statement(feature: Feature) -> Option<Statement> {
    let statement = match feature {
        Feature::AnyQuantifier => Statement::new(
            "probe.any_quantifier",
            "RETURN ANY(x IN [1, 2] WHERE x = 1) AS probe",
        ),
        Feature::SpatialQueries => Statement::new(
            "probe.spatial",
            "RETURN point.distance(point({x: 0.0, y: 0.0}), point({x: 3.0, y: 4.0})) AS probe",
        ),
        Feature::ShowIndexes => Statement::new(
            "probe.show_indexes",
            "SHOW INDEXES YIELD name RETURN name AS probe LIMIT 1",
        ),
        Feature::Authentication => return None,
    };
    Some(statement.returns(["probe"]))
}

/// The negotiated feature set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    supported: BTreeSet<Feature>,
}

impl Capabilities {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            supported: features.into_iter().collect(),
        }
    }

    /// Run one probe statement per feature, each in its own throwaway session.
    pub async fn probe(driver: &dyn Driver, config: &GraphConfig) -> Self {
        let mut supported = BTreeSet::new();
        for feature in Feature::ALL {
            let Some(statement) = probe_statement(feature) else {
                continue;
            };
            match probe_one(driver, &statement).await {
                Ok(()) => {
                    supported.insert(feature);
                }
                Err(err) => {
                    tracing::debug!(?feature, error = %err, "Feature probe failed");
                }
            }
        }
        if !config.user.is_empty() {
            supported.insert(Feature::Authentication);
        }
        tracing::info!(features = ?supported, "Server capabilities negotiated");
        Self { supported }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.supported.contains(&feature)
    }

    /// List quantifier for array-membership predicates.
    pub fn quantifier(&self) -> Quantifier {
        if self.supports(Feature::AnyQuantifier) {
            Quantifier::Any
        } else {
            Quantifier::Single
        }
    }

    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.supported.iter().copied()
    }
}

async fn probe_one(driver: &dyn Driver, statement: &Statement) -> Result<(), RemoteError> {
    let mut session = driver.begin().await?;
    let result = session.run(statement).await;
    if let Err(err) = session.rollback().await {
        tracing::debug!(error = %err, "Probe rollback failed");
    }
    result.map(drop)
}
