//! Tab separated log of sampled states.
//!
//! The first line names the columns; every following line is one sample.
//! Global columns come first:
//!
//! ```text
//! generation ln_likelihood ln_prior number_of_events [concentration] [discount] [split_weight]
//! ```
//!
//! followed by, for each comparison `L` with populations `P…`:
//!
//! ```text
//! ln_likelihood_L root_height_L root_height_index_L pop_size_P… pop_size_root_L
//! [pop_size_multiplier_P… pop_size_multiplier_root_L] mutation_rate_L freq_1_L
//! ```
//!
//! Hyperparameter columns appear only when they are estimated, multiplier
//! columns only for comparisons that use them. Comparisons in the same event
//! report the same `root_height` and `root_height_index`.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use itertools::Itertools;

use crate::Lens;
use crate::data::partition::EventPartition;
use crate::error::{CodivError, Result};
use crate::mcmc::Link;
use crate::models::comparison::{
    ComparisonModel, ComparisonState, PopulationSizeModel, PopulationSizes,
};
use crate::models::partition::Hyperparameter;
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};

fn estimated_hyperparameters(settings: &ModelSettings) -> Vec<(Hyperparameter, &'static str)> {
    let event_model = &settings.event_model;
    [
        (
            event_model.concentration_prior.is_some(),
            Hyperparameter::Concentration,
            "concentration",
        ),
        (
            event_model.discount_prior.is_some(),
            Hyperparameter::Discount,
            "discount",
        ),
        (
            event_model.split_weight_prior.is_some(),
            Hyperparameter::SplitWeight,
            "split_weight",
        ),
    ]
    .into_iter()
    .filter_map(|(estimated, parameter, name)| estimated.then_some((parameter, name)))
    .collect()
}

fn comparison_columns(comparison: &ComparisonModel) -> Vec<String> {
    let label = &comparison.label;
    let mut columns = vec![
        format!("ln_likelihood_{label}"),
        format!("root_height_{label}"),
        format!("root_height_index_{label}"),
    ];
    columns.extend(comparison.populations.iter().map(|p| format!("pop_size_{p}")));
    columns.push(format!("pop_size_root_{label}"));
    if comparison.uses_multipliers() {
        columns.extend(
            comparison
                .populations
                .iter()
                .map(|p| format!("pop_size_multiplier_{p}")),
        );
        columns.push(format!("pop_size_multiplier_root_{label}"));
    }
    columns.push(format!("mutation_rate_{label}"));
    columns.push(format!("freq_1_{label}"));
    columns
}

/// Column names of a state log for `settings`.
#[must_use]
pub fn header(settings: &ModelSettings) -> Vec<String> {
    let mut columns: Vec<String> = ["generation", "ln_likelihood", "ln_prior", "number_of_events"]
        .into_iter()
        .map(String::from)
        .collect();
    columns.extend(
        estimated_hyperparameters(settings)
            .into_iter()
            .map(|(_, name)| String::from(name)),
    );
    columns.extend(settings.comparisons.iter().flat_map(comparison_columns));
    columns
}

/// Writes the header on creation and one row per sample.
pub struct StateLogWriter<W: Write> {
    writer: W,
    n_columns: usize,
}

impl<W: Write> StateLogWriter<W> {
    /// Write the header for `settings`.
    ///
    /// Population labels must not repeat across comparisons, otherwise two
    /// columns would share a name.
    pub fn new(mut writer: W, settings: &ModelSettings) -> Result<Self> {
        let columns = header(settings);
        let mut seen = HashSet::new();
        if let Some(duplicate) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(CodivError::config(format!(
                "state log column {duplicate} appears twice; population labels must be unique"
            )));
        }
        writeln!(writer, "{}", columns.iter().join("\t"))?;
        Ok(Self {
            writer,
            n_columns: columns.len(),
        })
    }

    /// Append the state of `link` at `generation`.
    pub fn write_row<L: Likelihood>(
        &mut self,
        generation: usize,
        link: &Link<State>,
        collection: &Collection<L>,
    ) -> Result<()> {
        let state = &link.model;
        let settings = &collection.settings;

        let mut row: Vec<String> = vec![
            generation.to_string(),
            link.ln_likelihood.to_string(),
            link.ln_prior.to_string(),
            state.n_events().to_string(),
        ];
        row.extend(
            estimated_hyperparameters(settings)
                .into_iter()
                .map(|(parameter, _)| parameter.get(&state.process).unwrap_or(f64::NAN).to_string()),
        );

        let ln_likelihoods = collection.comparison_ln_likelihoods(state);
        for (i, (comparison, ln_likelihood)) in
            state.comparisons.iter().zip(ln_likelihoods).enumerate()
        {
            row.push(ln_likelihood.to_string());
            row.push(state.partition.time_of(i).to_string());
            row.push(state.partition.event_of(i).to_string());
            row.extend(comparison.leaf_sizes().iter().map(ToString::to_string));
            row.push(comparison.root_size().to_string());
            if let Some(multipliers) = comparison.multipliers() {
                row.extend(multipliers.iter().map(ToString::to_string));
            }
            row.push(comparison.mutation_rate.to_string());
            row.push(comparison.freq_1.to_string());
        }

        debug_assert_eq!(row.len(), self.n_columns);
        writeln!(self.writer, "{}", row.iter().join("\t"))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Cursor over the fields of one row.
struct Fields<'a> {
    line: usize,
    columns: &'a [String],
    values: Vec<&'a str>,
    position: usize,
}

impl<'a> Fields<'a> {
    fn next_str(&mut self) -> Result<(&'a str, &'a str)> {
        let i = self.position;
        self.position += 1;
        match (self.columns.get(i), self.values.get(i)) {
            (Some(column), Some(value)) => Ok((column.as_str(), *value)),
            _ => Err(CodivError::parse(self.line, "row is shorter than the header")),
        }
    }

    fn next_f64(&mut self) -> Result<f64> {
        let (column, value) = self.next_str()?;
        value.parse().map_err(|_| {
            CodivError::parse(self.line, format!("column {column}: {value} is not a number"))
        })
    }

    fn next_usize(&mut self) -> Result<usize> {
        let (column, value) = self.next_str()?;
        value.parse().map_err(|_| {
            CodivError::parse(self.line, format!("column {column}: {value} is not an index"))
        })
    }

    fn take_f64(&mut self, n: usize) -> Result<Vec<f64>> {
        (0..n).map(|_| self.next_f64()).collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn population_sizes(
    model: &ComparisonModel,
    leaves: Vec<f64>,
    root: f64,
    multipliers: Option<Vec<f64>>,
) -> PopulationSizes {
    match (&model.population_sizes, multipliers) {
        (PopulationSizeModel::Multipliers { .. }, Some(multipliers)) => {
            let total = leaves.iter().sum::<f64>() + root;
            PopulationSizes::Multipliers {
                mean: total / multipliers.len() as f64,
                multipliers,
            }
        }
        (PopulationSizeModel::RootRelative { .. }, _) => {
            let mean_leaf = leaves.iter().sum::<f64>() / leaves.len() as f64;
            PopulationSizes::RootRelative {
                relative_root: root / mean_leaf,
                leaves,
            }
        }
        _ => PopulationSizes::Independent { root, leaves },
    }
}

/// Read the last row of a state log written for `settings` back into a
/// state, returning its generation too.
pub fn read_last_state<R: BufRead>(reader: R, settings: &ModelSettings) -> Result<(usize, State)> {
    let columns = header(settings);
    let mut lines = reader.lines();

    let first = lines
        .next()
        .transpose()?
        .ok_or_else(|| CodivError::parse(1, "state log is empty"))?;
    let found: Vec<&str> = first.trim_end().split('\t').collect();
    if found != columns {
        return Err(CodivError::parse(
            1,
            "header does not match the configured comparisons",
        ));
    }

    let mut last = None;
    for (i, line) in lines.enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some((i + 2, line));
        }
    }
    let (line_number, line) =
        last.ok_or_else(|| CodivError::parse(1, "state log has no samples"))?;

    let values: Vec<&str> = line.trim_end().split('\t').collect();
    if values.len() != columns.len() {
        return Err(CodivError::parse(
            line_number,
            format!("expected {} fields, found {}", columns.len(), values.len()),
        ));
    }
    let mut fields = Fields {
        line: line_number,
        columns: &columns,
        values,
        position: 0,
    };

    let generation = fields.next_usize()?;
    fields.next_f64()?;
    fields.next_f64()?;
    let n_events = fields.next_usize()?;

    let mut process = settings.event_model.process.clone();
    for (parameter, name) in estimated_hyperparameters(settings) {
        let value = fields.next_f64()?;
        let valid = match parameter {
            Hyperparameter::Concentration => process.set_concentration(value),
            Hyperparameter::Discount => process.set_discount(value),
            Hyperparameter::SplitWeight => process.set_split_weight(value),
        };
        if !valid {
            return Err(CodivError::parse(
                line_number,
                format!("{name} {value} is outside its support"),
            ));
        }
    }

    let mut assignments = Vec::with_capacity(settings.n_comparisons());
    let mut times: Vec<Option<f64>> = vec![None; n_events];
    let mut comparisons = Vec::with_capacity(settings.n_comparisons());
    for model in &settings.comparisons {
        fields.next_f64()?;
        let time = fields.next_f64()?;
        let event = fields.next_usize()?;
        let leaves = fields.take_f64(model.n_leaves())?;
        let root = fields.next_f64()?;
        let multipliers = if model.uses_multipliers() {
            Some(fields.take_f64(model.n_leaves() + 1)?)
        } else {
            None
        };
        let mutation_rate = fields.next_f64()?;
        let freq_1 = fields.next_f64()?;

        match times.get_mut(event) {
            Some(slot @ None) => *slot = Some(time),
            Some(Some(shared)) if *shared == time => {}
            Some(Some(_)) => {
                return Err(CodivError::parse(
                    line_number,
                    format!("comparison {} disagrees on the time of event {event}", model.label),
                ));
            }
            None => {
                return Err(CodivError::parse(
                    line_number,
                    format!("event index {event} with only {n_events} events"),
                ));
            }
        }
        assignments.push(event);
        comparisons.push(ComparisonState {
            population_sizes: population_sizes(model, leaves, root, multipliers),
            mutation_rate,
            freq_1,
        });
    }

    let times: Vec<f64> = times
        .into_iter()
        .enumerate()
        .map(|(event, time)| {
            time.ok_or_else(|| {
                CodivError::parse(line_number, format!("event {event} has no comparisons"))
            })
        })
        .collect::<Result<_>>()?;
    let partition = EventPartition::from_assignments(&assignments, &times)
        .map_err(|e| CodivError::parse(line_number, e.to_string()))?;
    let state = State::new(partition, comparisons, process, settings)
        .map_err(|e| CodivError::parse(line_number, e.to_string()))?;

    if state.ln_prior(settings) == f64::NEG_INFINITY {
        return Err(CodivError::parse(
            line_number,
            "state lies outside the support of the prior",
        ));
    }
    Ok((generation, state))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::models::comparison::{MultiplierModel, ParameterModel};
    use crate::models::partition::{DirichletProcess, PartitionProcess};
    use crate::models::state::tests::{dp_settings, pair};
    use crate::models::{EventModel, IgnoreData};
    use crate::rvs::{DirichletPrior, Prior};

    fn mixed_settings() -> ModelSettings {
        let gamma = Prior::gamma(4.0, 0.25).expect("valid");
        let relative = ComparisonModel::new(
            String::from("rel"),
            vec![String::from("rel_a"), String::from("rel_b")],
            None,
            PopulationSizeModel::RootRelative {
                leaf: ParameterModel::estimated(gamma.clone(), None).expect("valid"),
                relative_root: ParameterModel::estimated(gamma.clone(), None).expect("valid"),
            },
            ParameterModel::estimated(gamma.clone(), None).expect("valid"),
            ParameterModel::estimated(Prior::beta(2.0, 2.0).expect("valid"), None)
                .expect("valid"),
        )
        .expect("valid");
        let multipliers = ComparisonModel::new(
            String::from("mul"),
            vec![String::from("mul_a")],
            None,
            PopulationSizeModel::Multipliers {
                mean: ParameterModel::estimated(gamma, None).expect("valid"),
                multipliers: MultiplierModel::estimated(
                    DirichletPrior::new(vec![1.0, 1.0]).expect("valid"),
                    None,
                )
                .expect("valid"),
            },
            ParameterModel::fixed(1.0),
            ParameterModel::fixed(0.5),
        )
        .expect("valid");
        ModelSettings::new(
            vec![pair("ind"), relative, multipliers],
            Prior::gamma(5.0, 0.1).expect("valid"),
            EventModel::new(
                PartitionProcess::DirichletProcess(DirichletProcess::new(1.0).expect("valid")),
                Some(Prior::gamma(2.0, 1.0).expect("valid")),
                None,
                None,
            )
            .expect("valid"),
        )
        .expect("valid")
    }

    #[test]
    fn header_names_every_column() {
        let columns = header(&mixed_settings());
        assert_eq!(
            columns,
            vec![
                "generation",
                "ln_likelihood",
                "ln_prior",
                "number_of_events",
                "concentration",
                "ln_likelihood_ind",
                "root_height_ind",
                "root_height_index_ind",
                "pop_size_inda",
                "pop_size_indb",
                "pop_size_root_ind",
                "mutation_rate_ind",
                "freq_1_ind",
                "ln_likelihood_rel",
                "root_height_rel",
                "root_height_index_rel",
                "pop_size_rel_a",
                "pop_size_rel_b",
                "pop_size_root_rel",
                "mutation_rate_rel",
                "freq_1_rel",
                "ln_likelihood_mul",
                "root_height_mul",
                "root_height_index_mul",
                "pop_size_mul_a",
                "pop_size_root_mul",
                "pop_size_multiplier_mul_a",
                "pop_size_multiplier_root_mul",
                "mutation_rate_mul",
                "freq_1_mul",
            ]
        );
    }

    #[test]
    fn rows_match_the_header() {
        let settings = mixed_settings();
        let collection = Collection::new(settings, IgnoreData);
        let mut rng = SmallRng::seed_from_u64(0x10);
        let state = State::draw_from_settings(&collection.settings, &mut rng);
        let link = Link::new(state, &collection);

        let mut writer = StateLogWriter::new(Vec::new(), &collection.settings).expect("header");
        writer.write_row(0, &link, &collection).expect("row");
        writer.write_row(10, &link, &collection).expect("row");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let n_columns = lines[0].split('\t').count();
        assert!(lines.iter().all(|l| l.split('\t').count() == n_columns));
        assert!(lines[2].starts_with("10\t"));
    }

    #[test]
    fn last_state_reads_back() {
        let settings = mixed_settings();
        let collection = Collection::new(settings, IgnoreData);
        let mut rng = SmallRng::seed_from_u64(0x11);

        let mut writer = StateLogWriter::new(Vec::new(), &collection.settings).expect("header");
        let mut last = None;
        for generation in [0, 5, 10] {
            let state = State::draw_from_settings(&collection.settings, &mut rng);
            writer
                .write_row(generation, &Link::new(state.clone(), &collection), &collection)
                .expect("row");
            last = Some(state);
        }
        let expected = last.expect("written");
        let text = writer.into_inner();

        let (generation, state) =
            read_last_state(Cursor::new(text), &collection.settings).expect("readable");
        assert_eq!(generation, 10);
        assert_eq!(state.partition, expected.partition);
        assert_eq!(state.process, expected.process);
        assert_eq!(state.comparisons[0], expected.comparisons[0]);
        for (read, written) in state.comparisons.iter().zip(&expected.comparisons) {
            assert::close(read.root_size(), written.root_size(), 1e-9);
            assert::close(read.leaf_sizes(), written.leaf_sizes(), 1e-9);
            assert_eq!(read.mutation_rate, written.mutation_rate);
            assert_eq!(read.freq_1, written.freq_1);
        }
        assert::close(
            state.ln_prior(&collection.settings),
            expected.ln_prior(&collection.settings),
            1e-6,
        );
    }

    #[test]
    fn mismatched_logs_are_parse_errors() {
        let settings = dp_settings(2);
        let collection = Collection::new(settings, IgnoreData);
        let mut rng = SmallRng::seed_from_u64(0x12);
        let state = State::initial(&collection.settings, &mut rng);
        let mut writer = StateLogWriter::new(Vec::new(), &collection.settings).expect("header");
        writer
            .write_row(0, &Link::new(state, &collection), &collection)
            .expect("row");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");

        let other = dp_settings(3);
        assert!(matches!(
            read_last_state(Cursor::new(text.clone()), &other),
            Err(CodivError::Parse { line: 1, .. })
        ));

        let truncated = text.rsplit_once('\t').expect("fields").0.to_string();
        assert!(matches!(
            read_last_state(Cursor::new(truncated), &collection.settings),
            Err(CodivError::Parse { line: 2, .. })
        ));

        let header_only = text.lines().next().expect("header").to_string();
        assert!(read_last_state(Cursor::new(header_only), &collection.settings).is_err());
    }

    #[test]
    fn repeated_population_labels_are_rejected() {
        let mut a = pair("a");
        let mut b = pair("b");
        a.populations = vec![String::from("x"), String::from("y")];
        b.populations = vec![String::from("x"), String::from("z")];
        let settings = ModelSettings::new(
            vec![a, b],
            Prior::gamma(5.0, 0.1).expect("valid"),
            EventModel::fixed_hyperparameters(PartitionProcess::DirichletProcess(
                DirichletProcess::new(1.0).expect("valid"),
            )),
        )
        .expect("valid");
        assert!(StateLogWriter::new(Vec::new(), &settings).is_err());
    }
}
