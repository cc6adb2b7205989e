/*!
Sample persistence.

Each sampler appends one record per sample to a [`SampleSink`]: the state
vector plus a fixed set of named scalar diagnostics (log-probability,
Hamiltonian, acceptance ratio and so on, depending on the sampler).
[`MemorySink`] collects records in memory and is what the tests and the
statistics helpers consume; `CsvSink` (behind the `csv` cargo feature)
streams records to disk with the run metadata as leading comment lines.

# Examples

```rust
use geodesic_mcmc::io::{MemorySink, SampleSink};
use geodesic_mcmc::state::State;

let mut sink = MemorySink::new();
sink.append(&State::from_slice(&[1.0, 2.0]), &[("log_px", -0.5)]).unwrap();
assert_eq!(sink.len(), 1);
assert_eq!(sink.to_matrix().nrows(), 1);
```
*/

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::error::McmcError;
use crate::state::State;

/// Flat string map describing a run (algorithm name, seed, step scale,
/// counts). Written once per run, passed through untouched.
pub type RunMetadata = BTreeMap<String, String>;

/// Append-only destination for sample records, one per sample in program
/// order.
///
/// The diagnostic slice has the same names in the same order on every call
/// for a given run; sinks may rely on that to build their header from the
/// first record.
pub trait SampleSink {
    fn append(&mut self, state: &State, diagnostics: &[(&str, f64)]) -> Result<(), McmcError>;
}

/// One recorded sample: the state and its named diagnostics.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub state: State,
    pub diagnostics: Vec<(String, f64)>,
}

impl SampleRecord {
    /// Looks up a diagnostic by name.
    pub fn diagnostic(&self, name: &str) -> Option<f64> {
        self.diagnostics
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// In-memory sink; the workhorse for tests and post-run statistics.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<SampleRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stacks the recorded states into a samples × dimensions matrix for the
    /// summaries in [`crate::stats`].
    pub fn to_matrix(&self) -> DMatrix<f64> {
        if self.records.is_empty() {
            return DMatrix::zeros(0, 0);
        }
        let dim = self.records[0].state.len();
        DMatrix::from_fn(self.records.len(), dim, |i, j| self.records[i].state[j])
    }
}

impl SampleSink for MemorySink {
    fn append(&mut self, state: &State, diagnostics: &[(&str, f64)]) -> Result<(), McmcError> {
        self.records.push(SampleRecord {
            state: state.clone(),
            diagnostics: diagnostics
                .iter()
                .map(|(n, v)| (n.to_string(), *v))
                .collect(),
        });
        Ok(())
    }
}

/// Sink that drops every record; useful for burn-in runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn append(&mut self, _state: &State, _diagnostics: &[(&str, f64)]) -> Result<(), McmcError> {
        Ok(())
    }
}

#[cfg(feature = "csv")]
pub use self::csv_sink::CsvSink;

#[cfg(feature = "csv")]
mod csv_sink {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use csv::Writer;

    use super::{RunMetadata, SampleSink};
    use crate::error::McmcError;
    use crate::state::State;

    /// Streams sample records to a CSV file.
    ///
    /// Run metadata is written first as `# key: value` comment lines, then a
    /// header row (`x_0`, `x_1`, … followed by the diagnostic names from the
    /// first record), then one row per record.
    pub struct CsvSink {
        writer: Writer<File>,
        header_written: bool,
    }

    impl CsvSink {
        pub fn create(path: impl AsRef<Path>, metadata: &RunMetadata) -> Result<Self, McmcError> {
            let mut file = File::create(path)?;
            for (key, value) in metadata {
                writeln!(file, "# {}: {}", key, value)?;
            }
            Ok(Self {
                writer: Writer::from_writer(file),
                header_written: false,
            })
        }
    }

    impl SampleSink for CsvSink {
        fn append(&mut self, state: &State, diagnostics: &[(&str, f64)]) -> Result<(), McmcError> {
            if !self.header_written {
                let mut header: Vec<String> =
                    (0..state.len()).map(|i| format!("x_{}", i)).collect();
                header.extend(diagnostics.iter().map(|(n, _)| n.to_string()));
                self.writer.write_record(&header)?;
                self.header_written = true;
            }

            let mut row: Vec<String> = (0..state.len()).map(|i| state[i].to_string()).collect();
            row.extend(diagnostics.iter().map(|(_, v)| v.to_string()));
            self.writer.write_record(&row)?;
            self.writer.flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_collects_records_in_order() {
        let mut sink = MemorySink::new();
        sink.append(&State::from_slice(&[1.0, 2.0]), &[("log_px", -1.0)])
            .unwrap();
        sink.append(&State::from_slice(&[3.0, 4.0]), &[("log_px", -2.0)])
            .unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records()[1].diagnostic("log_px"), Some(-2.0));
        assert_eq!(sink.records()[1].diagnostic("missing"), None);

        let matrix = sink.to_matrix();
        assert_eq!((matrix.nrows(), matrix.ncols()), (2, 2));
        assert_eq!(matrix[(0, 0)], 1.0);
        assert_eq!(matrix[(1, 1)], 4.0);
    }

    #[test]
    fn empty_memory_sink_gives_empty_matrix() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.to_matrix().nrows(), 0);
    }

    #[cfg(feature = "csv")]
    #[test]
    fn csv_sink_writes_metadata_header_and_rows() {
        use std::fs;
        use tempfile::NamedTempFile;

        let file = NamedTempFile::new().unwrap();
        let mut metadata = RunMetadata::new();
        metadata.insert("algorithm".to_string(), "metropolis".to_string());
        metadata.insert("seed".to_string(), "42".to_string());

        {
            let mut sink = CsvSink::create(file.path(), &metadata).unwrap();
            sink.append(&State::from_slice(&[0.5, -1.5]), &[("log_px", -3.25)])
                .unwrap();
            sink.append(&State::from_slice(&[1.0, 0.0]), &[("log_px", -0.5)])
                .unwrap();
        }

        let contents = fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "# algorithm: metropolis");
        assert_eq!(lines[1], "# seed: 42");
        assert_eq!(lines[2], "x_0,x_1,log_px");
        assert_eq!(lines[3], "0.5,-1.5,-3.25");
        assert_eq!(lines[4], "1,0,-0.5");
    }
}
