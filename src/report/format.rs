//! Formatted terminal output.
//!
//! Formatting lives in one place so the numerical code stays clean and output
//! changes are localized.

use crate::domain::EngineConfig;
use crate::report::{CoefficientRow, Rankings, RunResults, STATUS_OMITTED};

/// Run header: input, settings and partition overview.
pub fn format_run_summary(config: &EngineConfig, n_observations: usize, results: &RunResults) -> String {
    let mut out = String::new();

    out.push_str("=== vl - LASSO + bootstrap by region ===\n");
    out.push_str(&format!(
        "Outcome: {} | covariates: {} ({} columns after expansion)\n",
        config.outcome,
        config.covariates.len() + config.categorical.len(),
        results.variables.len()
    ));
    out.push_str(&format!(
        "Observations: {n_observations} | partitions: {} ({} omitted)\n",
        results.summaries.len(),
        results.omitted_partitions().len()
    ));
    out.push_str(&format!(
        "CV: {} folds, seed {} | bootstrap: {} replicates, seed {}, {:.0}% intervals\n",
        config.cv.folds,
        config.cv.seed,
        config.bootstrap.replicates,
        config.bootstrap.seed,
        100.0 * config.bootstrap.confidence
    ));

    out.push_str("\nFit summary:\n");
    out.push_str(
        format!(
            "{:<20} {:>6} {:>8} {:>8} {:>11} {:>8} {:>10}  {}\n",
            "partition", "n", "R2(cv)", "R2(in)", "lambda", "nonzero", "replicates", "note"
        )
        .trim_end(),
    );
    out.push('\n');
    for s in &results.summaries {
        let line = if s.status == STATUS_OMITTED {
            format!(
                "{:<20} {:>6} {:>8} {:>8} {:>11} {:>8} {:>10}  omitted: {}\n",
                truncate(&s.partition, 20),
                s.n,
                "-",
                "-",
                "-",
                "-",
                "-",
                s.note
            )
        } else {
            format!(
                "{:<20} {:>6} {:>8} {:>8} {:>11} {:>8} {:>10}  {}\n",
                truncate(&s.partition, 20),
                s.n,
                fmt_opt(s.r_squared, 3),
                fmt_opt(s.r_squared_in_sample, 3),
                s.selected_lambda.map(|l| format!("{l:.3e}")).unwrap_or_default(),
                s.nonzero.map(|v| v.to_string()).unwrap_or_default(),
                format!(
                    "{}/{}",
                    s.replicates_used.unwrap_or(0),
                    s.replicates_requested.unwrap_or(0)
                ),
                s.note
            )
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.push('\n');

    out
}

/// Coefficient table, one block per partition, variables in `variable_order`.
pub fn format_coefficients(results: &RunResults) -> String {
    let mut out = String::new();
    let mut partitions: Vec<&str> = Vec::new();
    for row in &results.coefficients {
        if !partitions.contains(&row.partition.as_str()) {
            partitions.push(&row.partition);
        }
    }

    for partition in partitions {
        let rows: Vec<&CoefficientRow> = results
            .coefficients
            .iter()
            .filter(|r| r.partition == partition)
            .collect();
        out.push_str(&format!("Coefficients [{partition}]:\n"));
        if rows.iter().all(|r| r.status == STATUS_OMITTED) {
            out.push_str("  (partition omitted)\n\n");
            continue;
        }

        out.push_str(
            format!(
                "{:<28} {:>10} {:>10} {:>10} {:<8} {}\n",
                "variable", "observed", "lower", "upper", "sign", "flags"
            )
            .trim_end(),
        );
        out.push('\n');
        for variable in &results.variable_order {
            let Some(r) = rows.iter().find(|r| &r.variable == variable) else {
                continue;
            };
            let mut flags = Vec::new();
            if r.excludes_zero() {
                flags.push("*");
            }
            if r.converged == Some(false) {
                flags.push("not-converged");
            }
            if r.reduced_replicates == Some(true) {
                flags.push("reduced-B");
            }
            out.push_str(
                format!(
                    "{:<28} {:>10} {:>10} {:>10} {:<8} {}\n",
                    truncate(&r.variable, 28),
                    fmt_opt(r.observed, 4),
                    fmt_opt(r.lower, 4),
                    fmt_opt(r.upper, 4),
                    r.sign.as_deref().unwrap_or(""),
                    flags.join(" ")
                )
                .trim_end(),
            );
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str("* interval excludes zero\n");

    out
}

/// Over/under-performer tables.
pub fn format_rankings(rankings: &[Rankings]) -> String {
    let mut out = String::new();
    for r in rankings {
        out.push_str(&format!("Top over-performers [{}] (outcome above model):\n", r.partition));
        out.push_str(&format_residual_table(&r.over));
        out.push('\n');
        out.push_str(&format!("Top under-performers [{}] (outcome below model):\n", r.partition));
        out.push_str(&format_residual_table(&r.under));
        out.push('\n');
    }
    out
}

fn format_residual_table(rows: &[crate::report::ResidualRow]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<24} {:>10} {:>10} {:>10} {:>21}\n",
            "unit_id", "observed", "fitted", "residual", "prediction interval"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!("{:-<24} {:-<10} {:-<10} {:-<10} {:-<21}\n", "", "", "", "", "").trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<24} {:>10.4} {:>10.4} {:>10.4} [{:>8.4}, {:>8.4}]\n",
                truncate(&r.unit_id, 24),
                r.observed,
                r.fitted,
                r.residual,
                r.prediction_lower,
                r.prediction_upper
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) => format!("{v:.decimals$}"),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
