use crate::sweep::schema::{FieldSpec, FieldValue, TableSchema};
use crate::sweep::store::{sweep_key, ResultStore};
use anyhow::{bail, Context, Result};

/// One index variant: the values of the family's algorithm fields plus the
/// key and construction parameters handed to the index builder.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmConfiguration {
    pub key: String,
    pub parameters: String,
    pub values: Vec<FieldValue>,
}

/// Search-time parameters, one value per case field.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCase {
    pub values: Vec<FieldValue>,
}

/// Fixed axes crossed with every (configuration, query case) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepAxes {
    pub tops: Vec<u32>,
    pub batch_sizes: Vec<u32>,
    pub thread_counts: Vec<u32>,
}

/// Ordered CPU ids; a case with `n` threads is pinned to the first `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuPool(Vec<u32>);

impl CpuPool {
    pub fn new(cpus: Vec<u32>) -> Self {
        Self(cpus)
    }

    /// Parse a list like `0-23,48-71,24-47`. Order is kept as written.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut cpus = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.trim().parse().with_context(|| format!("cpu range `{part}`"))?;
                    let hi: u32 = hi.trim().parse().with_context(|| format!("cpu range `{part}`"))?;
                    if lo > hi {
                        bail!("cpu range `{part}` is descending");
                    }
                    cpus.extend(lo..=hi);
                }
                None => cpus.push(part.parse().with_context(|| format!("cpu id `{part}`"))?),
            }
        }
        Ok(Self(cpus))
    }

    /// Every logical CPU of this host, ascending.
    pub fn detect() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu_list(sysinfo::CpuRefreshKind::nothing());
        let count = u32::try_from(sys.cpus().len()).unwrap_or(u32::MAX);
        Self((0..count.max(1)).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Affinity list for `thread_count` threads.
    pub fn prefix(&self, thread_count: u32) -> Result<&[u32]> {
        let n = thread_count as usize;
        if n > self.0.len() {
            bail!(
                "{thread_count} threads requested but the CPU pool has {} entries",
                self.0.len()
            );
        }
        Ok(&self.0[..n])
    }
}

/// A case that still needs measuring, with the CPUs its threads run on.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseDescriptor {
    pub case: QueryCase,
    pub top: u32,
    pub batch_size: u32,
    pub thread_count: u32,
    pub cpus: Vec<u32>,
}

impl CaseDescriptor {
    /// `nprobe=32/1x4:0,1,2,3`
    pub fn expression(&self, case_fields: &[FieldSpec]) -> String {
        let params: Vec<String> = case_fields
            .iter()
            .zip(&self.case.values)
            .map(|(spec, value)| format!("{}={}", spec.name, value))
            .collect();
        let cpus: Vec<String> = self.cpus.iter().map(u32::to_string).collect();
        format!(
            "{}/{}x{}:{}",
            params.join(","),
            self.batch_size,
            self.thread_count,
            cpus.join(",")
        )
    }
}

/// Semicolon-joined expressions, in the order the cases were emitted.
pub fn join_expressions(cases: &[CaseDescriptor], case_fields: &[FieldSpec]) -> String {
    cases
        .iter()
        .map(|c| c.expression(case_fields))
        .collect::<Vec<_>>()
        .join(";")
}

/// Expands one configuration into the cases not yet present in the store.
pub struct CaseMatrixBuilder<'a> {
    store: &'a ResultStore,
    schema: &'a TableSchema,
    cpus: &'a CpuPool,
}

impl<'a> CaseMatrixBuilder<'a> {
    pub fn new(store: &'a ResultStore, schema: &'a TableSchema, cpus: &'a CpuPool) -> Self {
        Self {
            store,
            schema,
            cpus,
        }
    }

    /// Surviving cases for one result-size target, ordered query case, then
    /// batch size, then thread count. Parsed output is matched back in this
    /// same order. A key tuple is emitted at most once even if an axis
    /// repeats a value.
    pub fn build(
        &self,
        config: &AlgorithmConfiguration,
        cases: &[QueryCase],
        axes: &SweepAxes,
        top: u32,
    ) -> Result<Vec<CaseDescriptor>> {
        let mut surviving = Vec::new();
        for case in cases {
            for &batch_size in &axes.batch_sizes {
                for &thread_count in &axes.thread_counts {
                    let key = sweep_key(
                        self.schema,
                        &config.values,
                        &case.values,
                        top,
                        batch_size,
                        thread_count,
                    );
                    let emitted = surviving.iter().any(|c: &CaseDescriptor| {
                        c.case == *case
                            && c.batch_size == batch_size
                            && c.thread_count == thread_count
                    });
                    if emitted {
                        tracing::debug!(
                            key = %config.key,
                            top,
                            batch_size,
                            thread_count,
                            "case repeated within batch, skipping"
                        );
                        continue;
                    }
                    if self.store.exists(self.schema, &key)? {
                        tracing::debug!(
                            key = %config.key,
                            top,
                            batch_size,
                            thread_count,
                            "case already recorded, skipping"
                        );
                        continue;
                    }
                    surviving.push(CaseDescriptor {
                        case: case.clone(),
                        top,
                        batch_size,
                        thread_count,
                        cpus: self.cpus.prefix(thread_count)?.to_vec(),
                    });
                }
            }
        }
        Ok(surviving)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::parser::{BenchmarkMetrics, Statistics};
    use crate::sweep::store::ResultRecord;

    fn schema() -> TableSchema {
        TableSchema::new(
            "bench",
            vec![FieldSpec::integer("centroid")],
            vec![FieldSpec::integer("nprobe")],
            vec![99.0],
        )
        .unwrap()
    }

    fn config() -> AlgorithmConfiguration {
        AlgorithmConfiguration {
            key: "IVF1024,Flat".into(),
            parameters: "verbose=0".into(),
            values: vec![FieldValue::Integer(1024)],
        }
    }

    fn cases(nprobes: &[i64]) -> Vec<QueryCase> {
        nprobes
            .iter()
            .map(|&n| QueryCase {
                values: vec![FieldValue::Integer(n)],
            })
            .collect()
    }

    fn stats() -> Statistics {
        Statistics {
            best: 1.0,
            worst: 1.0,
            avg: 1.0,
            percentiles: vec![1.0],
        }
    }

    #[test]
    fn cpu_prefix_has_thread_count_entries() {
        let pool = CpuPool::parse("0-3,8-11").unwrap();
        assert_eq!(pool.prefix(6).unwrap(), &[0, 1, 2, 3, 8, 9]);
        assert_eq!(pool.prefix(0).unwrap(), &[] as &[u32]);
        assert!(pool.prefix(9).is_err());
    }

    #[test]
    fn cpu_pool_parse_keeps_written_order() {
        let pool = CpuPool::parse("4-5, 0,2").unwrap();
        assert_eq!(pool.as_slice(), &[4, 5, 0, 2]);
        assert!(CpuPool::parse("5-2").is_err());
        assert!(CpuPool::parse("a").is_err());
    }

    #[test]
    fn detected_pool_is_not_empty() {
        assert!(!CpuPool::detect().is_empty());
    }

    #[test]
    fn expression_grammar() {
        let case = CaseDescriptor {
            case: cases(&[32]).remove(0),
            top: 10,
            batch_size: 1,
            thread_count: 4,
            cpus: vec![0, 1, 2, 3],
        };
        assert_eq!(case.expression(&schema().case_fields), "nprobe=32/1x4:0,1,2,3");
    }

    #[test]
    fn build_enumerates_case_batch_thread_order() {
        let store = ResultStore::open_in_memory().unwrap();
        let schema = schema();
        store.ensure_schema(&schema).unwrap();
        let pool = CpuPool::new((0..8).collect());
        let axes = SweepAxes {
            tops: vec![10],
            batch_sizes: vec![1, 16],
            thread_counts: vec![1, 2],
        };

        let builder = CaseMatrixBuilder::new(&store, &schema, &pool);
        let built = builder.build(&config(), &cases(&[32, 64]), &axes, 10).unwrap();
        let exprs = join_expressions(&built, &schema.case_fields);
        assert_eq!(
            exprs,
            "nprobe=32/1x1:0;nprobe=32/1x2:0,1;nprobe=32/16x1:0;nprobe=32/16x2:0,1;\
             nprobe=64/1x1:0;nprobe=64/1x2:0,1;nprobe=64/16x1:0;nprobe=64/16x2:0,1"
        );
        for case in &built {
            assert_eq!(case.cpus.len(), case.thread_count as usize);
        }
    }

    #[test]
    fn build_skips_recorded_combinations() {
        let store = ResultStore::open_in_memory().unwrap();
        let schema = schema();
        store.ensure_schema(&schema).unwrap();
        store
            .insert(
                &schema,
                &ResultRecord {
                    algo_values: config().values,
                    case_values: vec![FieldValue::Integer(32)],
                    top: 10,
                    batch_size: 1,
                    thread_count: 2,
                    metrics: BenchmarkMetrics {
                        qps: 1.0,
                        cpu_util: 1.0,
                        mem_r_bw: 1.0,
                        mem_w_bw: 1.0,
                        latency: stats(),
                        recall: stats(),
                    },
                },
            )
            .unwrap();

        let pool = CpuPool::new(vec![0, 1]);
        let axes = SweepAxes {
            tops: vec![10, 100],
            batch_sizes: vec![1],
            thread_counts: vec![1, 2],
        };
        let builder = CaseMatrixBuilder::new(&store, &schema, &pool);

        let at_10 = builder.build(&config(), &cases(&[32]), &axes, 10).unwrap();
        assert_eq!(at_10.len(), 1);
        assert_eq!(at_10[0].thread_count, 1);

        let at_100 = builder.build(&config(), &cases(&[32]), &axes, 100).unwrap();
        assert_eq!(at_100.len(), 2);
    }

    #[test]
    fn repeated_axis_values_emit_each_key_once() {
        let store = ResultStore::open_in_memory().unwrap();
        let schema = schema();
        store.ensure_schema(&schema).unwrap();
        let pool = CpuPool::new(vec![0, 1]);
        let axes = SweepAxes {
            tops: vec![10],
            batch_sizes: vec![1, 1],
            thread_counts: vec![2, 1, 2],
        };

        let builder = CaseMatrixBuilder::new(&store, &schema, &pool);
        let built = builder.build(&config(), &cases(&[32, 32]), &axes, 10).unwrap();
        assert_eq!(
            join_expressions(&built, &schema.case_fields),
            "nprobe=32/1x2:0,1;nprobe=32/1x1:0"
        );
    }
}
