//! Index families and how their parameter axes expand into configurations.
//!
//! Each family fixes the table's identifying columns, the index key format
//! understood by the engine, and the search-time case field.

use crate::error::StoreError;
use crate::sweep::matrix::{AlgorithmConfiguration, QueryCase};
use crate::sweep::schema::{FieldSpec, FieldValue, TableSchema};
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// A list of values, or an inclusive `start..=end` range with a step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Axis {
    List(Vec<i64>),
    Range {
        start: i64,
        end: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
}

fn default_step() -> i64 {
    1
}

impl Axis {
    pub fn values(&self, name: &str) -> Result<Vec<i64>> {
        let values: Vec<i64> = match self {
            Axis::List(values) => values.clone(),
            Axis::Range { start, end, step } => {
                if *step <= 0 {
                    bail!("axis `{name}`: step must be positive, got {step}");
                }
                let step = usize::try_from(*step)?;
                (*start..=*end).step_by(step).collect()
            }
        };
        if values.is_empty() {
            bail!("axis `{name}` has no values");
        }
        if let Some(dup) = first_duplicate(&values) {
            bail!("axis `{name}` repeats the value {dup}");
        }
        Ok(values)
    }
}

/// First value that appears more than once, if any.
pub(crate) fn first_duplicate<T: Copy + Eq + std::hash::Hash>(values: &[T]) -> Option<T> {
    let mut seen = HashSet::new();
    values.iter().copied().find(|v| !seen.insert(*v))
}

fn default_parameters() -> String {
    "verbose=0".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum AlgorithmFamily {
    /// `IVF<centroid>,PQ<code>` searched with `nprobe`.
    Ivfpq {
        centroids: Axis,
        codes: Axis,
        nprobes: Axis,
        #[serde(default = "default_parameters")]
        parameters: String,
    },
    /// `IVF<centroid>,Flat` searched with `nprobe`.
    Ivfflat {
        centroids: Axis,
        nprobes: Axis,
        #[serde(default = "default_parameters")]
        parameters: String,
    },
    /// `HNSW<M>-<efConstruction>` searched with `efSearch`.
    Hnsw {
        m: Axis,
        ef_constructions: Axis,
        ef_searches: Axis,
    },
}

impl AlgorithmFamily {
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmFamily::Ivfpq { .. } => "ivfpq",
            AlgorithmFamily::Ivfflat { .. } => "ivfflat",
            AlgorithmFamily::Hnsw { .. } => "hnsw",
        }
    }

    pub fn algo_fields(&self) -> Vec<FieldSpec> {
        match self {
            AlgorithmFamily::Ivfpq { .. } => {
                vec![FieldSpec::integer("centroid"), FieldSpec::integer("code")]
            }
            AlgorithmFamily::Ivfflat { .. } => vec![FieldSpec::integer("centroid")],
            AlgorithmFamily::Hnsw { .. } => {
                vec![FieldSpec::integer("M"), FieldSpec::integer("efConstruction")]
            }
        }
    }

    pub fn case_fields(&self) -> Vec<FieldSpec> {
        match self {
            AlgorithmFamily::Ivfpq { .. } | AlgorithmFamily::Ivfflat { .. } => {
                vec![FieldSpec::integer("nprobe")]
            }
            AlgorithmFamily::Hnsw { .. } => vec![FieldSpec::integer("efSearch")],
        }
    }

    pub fn schema(
        &self,
        table: &str,
        percentiles: &[f64],
    ) -> std::result::Result<TableSchema, StoreError> {
        TableSchema::new(
            table,
            self.algo_fields(),
            self.case_fields(),
            percentiles.to_vec(),
        )
    }

    /// Every index variant, first axis outermost.
    pub fn configurations(&self) -> Result<Vec<AlgorithmConfiguration>> {
        let mut configs = Vec::new();
        match self {
            AlgorithmFamily::Ivfpq {
                centroids,
                codes,
                parameters,
                ..
            } => {
                for centroid in centroids.values("centroids")? {
                    for code in codes.values("codes")? {
                        configs.push(AlgorithmConfiguration {
                            key: format!("IVF{centroid},PQ{code}"),
                            parameters: parameters.clone(),
                            values: vec![centroid.into(), code.into()],
                        });
                    }
                }
            }
            AlgorithmFamily::Ivfflat {
                centroids,
                parameters,
                ..
            } => {
                for centroid in centroids.values("centroids")? {
                    configs.push(AlgorithmConfiguration {
                        key: format!("IVF{centroid},Flat"),
                        parameters: parameters.clone(),
                        values: vec![centroid.into()],
                    });
                }
            }
            AlgorithmFamily::Hnsw {
                m,
                ef_constructions,
                ..
            } => {
                for m in m.values("m")? {
                    for ef in ef_constructions.values("ef_constructions")? {
                        configs.push(AlgorithmConfiguration {
                            key: format!("HNSW{m}-{ef}"),
                            parameters: format!("efConstruction={ef}"),
                            values: vec![m.into(), ef.into()],
                        });
                    }
                }
            }
        }
        Ok(configs)
    }

    /// Search-time cases, shared by every configuration of the family.
    pub fn query_cases(&self) -> Result<Vec<QueryCase>> {
        let (name, axis) = match self {
            AlgorithmFamily::Ivfpq { nprobes, .. } | AlgorithmFamily::Ivfflat { nprobes, .. } => {
                ("nprobes", nprobes)
            }
            AlgorithmFamily::Hnsw { ef_searches, .. } => ("ef_searches", ef_searches),
        };
        Ok(axis
            .values(name)?
            .into_iter()
            .map(|v| QueryCase {
                values: vec![FieldValue::Integer(v)],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_axis_is_inclusive() {
        let axis = Axis::Range {
            start: 1024,
            end: 4096,
            step: 1024,
        };
        assert_eq!(axis.values("c").unwrap(), vec![1024, 2048, 3072, 4096]);
    }

    #[test]
    fn bad_axes_are_rejected() {
        assert!(Axis::List(vec![]).values("x").is_err());
        let zero = Axis::Range {
            start: 1,
            end: 4,
            step: 0,
        };
        assert!(zero.values("x").is_err());
        let empty = Axis::Range {
            start: 4,
            end: 1,
            step: 1,
        };
        assert!(empty.values("x").is_err());
    }

    #[test]
    fn repeated_axis_value_is_rejected() {
        let err = Axis::List(vec![16, 32, 16]).values("nprobe").unwrap_err();
        assert!(err.to_string().contains("repeats the value 16"));
        assert_eq!(first_duplicate(&[1u32, 2, 3]), None);
    }

    #[test]
    fn ivfpq_keys_and_order() {
        let family: AlgorithmFamily = toml::from_str(
            r#"
            family = "ivfpq"
            centroids = { start = 1024, end = 2048, step = 1024 }
            codes = [32, 64]
            nprobes = [32]
            "#,
        )
        .unwrap();
        let keys: Vec<String> = family
            .configurations()
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(
            keys,
            vec!["IVF1024,PQ32", "IVF1024,PQ64", "IVF2048,PQ32", "IVF2048,PQ64"]
        );
        assert_eq!(family.configurations().unwrap()[0].parameters, "verbose=0");
    }

    #[test]
    fn hnsw_uses_construction_width_as_parameter() {
        let family: AlgorithmFamily = toml::from_str(
            r#"
            family = "hnsw"
            m = [32]
            ef_constructions = [200]
            ef_searches = { start = 16, end = 64, step = 16 }
            "#,
        )
        .unwrap();
        let configs = family.configurations().unwrap();
        assert_eq!(configs[0].key, "HNSW32-200");
        assert_eq!(configs[0].parameters, "efConstruction=200");
        assert_eq!(
            configs[0].values,
            vec![FieldValue::Integer(32), FieldValue::Integer(200)]
        );
        assert_eq!(family.query_cases().unwrap().len(), 4);

        let schema = family.schema("hnsw_runs", &[99.0]).unwrap();
        assert_eq!(schema.algo_fields[1].name, "efConstruction");
        assert_eq!(schema.case_fields[0].name, "efSearch");
    }

    #[test]
    fn ivfflat_has_single_algo_field() {
        let family: AlgorithmFamily = toml::from_str(
            r#"
            family = "ivfflat"
            centroids = [4096]
            nprobes = [1, 2]
            parameters = "verbose=1"
            "#,
        )
        .unwrap();
        let configs = family.configurations().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].key, "IVF4096,Flat");
        assert_eq!(configs[0].parameters, "verbose=1");
        assert_eq!(family.algo_fields().len(), 1);
    }
}
