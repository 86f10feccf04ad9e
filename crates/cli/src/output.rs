use crate::error::CliError;
use engine_runtime::TaskPage;
use model::execution::output::{AggregateValue, TaskOutput};
use model::execution::task::Task;
use model::records::dataset::Dataset;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(CliError::JsonSerialize)?;
    println!("{json}");
    Ok(())
}

pub fn print_datasets(datasets: &[Dataset]) {
    if datasets.is_empty() {
        println!("No datasets loaded");
        return;
    }
    println!(
        "{:<36} {:<20} {:>7} {:>10}  {}",
        "ID", "NAME", "VERSION", "ROWS", "UPDATED"
    );
    for dataset in datasets {
        println!(
            "{:<36} {:<20} {:>7} {:>10}  {}",
            dataset.id.to_string(),
            dataset.name,
            dataset.version,
            dataset.size,
            dataset.updated_at.to_rfc3339()
        );
    }
}

pub fn print_task_page(page: &TaskPage) {
    if page.tasks.is_empty() {
        println!("No matching tasks");
        return;
    }
    println!(
        "{:<36} {:<9} {:<9} {:>4} {:<11} {:>9} {:<9}",
        "TASK", "KIND", "VARIANT", "ITER", "STATUS", "MS", "VERDICT"
    );
    for task in &page.tasks {
        let verdict = if !task.validated {
            "-"
        } else if task.valid {
            "valid"
        } else {
            "invalid"
        };
        println!(
            "{:<36} {:<9} {:<9} {:>4} {:<11} {:>9} {:<9}",
            task.id.to_string(),
            task.kind.to_string(),
            task.variant.to_string(),
            task.iteration,
            task.status.to_string(),
            task.metrics.duration_ms,
            verdict
        );
    }
    println!(
        "{} of {} tasks (skip {})",
        page.tasks.len(),
        page.total,
        page.skip
    );
}

pub fn print_task(task: &Task) {
    println!("Task {}", task.id);
    println!("-----------------------------");
    println!("{:<16} {}", "Run", task.run_id);
    println!("{:<16} {}", "Kind", task.kind);
    println!("{:<16} {}", "Variant", task.variant);
    println!("{:<16} {}", "Trigger", task.trigger);
    println!("{:<16} {}", "Iteration", task.iteration);
    println!("{:<16} {}", "Status", task.status);
    println!("{:<16} {}", "Input rows", task.metrics.input_rows);
    let output_rows = task
        .metrics
        .output_rows
        .map(|n| n.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<16} {}", "Output rows", output_rows);
    println!("{:<16} {} ms", "Duration", task.metrics.duration_ms);

    let samples = &task.metrics.samples;
    if samples.is_empty() {
        println!("{:<16} none", "Samples");
    } else {
        let avg_cpu =
            samples.iter().map(|s| s.cpu_percent).sum::<f64>() / samples.len() as f64;
        let peak_mem = samples.iter().map(|s| s.memory_mb).fold(0.0, f64::max);
        println!(
            "{:<16} {} (avg cpu {:.1}%, peak mem {:.1} MB)",
            "Samples",
            samples.len(),
            avg_cpu,
            peak_mem
        );
    }

    let verdict = if !task.validated {
        "not validated yet".to_string()
    } else if task.valid {
        "valid".to_string()
    } else {
        "INVALID".to_string()
    };
    println!("{:<16} {}", "Verdict", verdict);
    if let Some(error) = &task.error {
        println!("{:<16} {}", "Error", error);
    }
    if let Some(output) = &task.output {
        print_output(output);
    }
}

fn print_output(output: &TaskOutput) {
    match output {
        TaskOutput::FilterIds(ids) => {
            println!("{:<16} {} surviving rows", "Output", ids.len());
        }
        TaskOutput::Groups(entries) => {
            let members: usize = entries.iter().map(|e| e.members.len()).sum();
            println!(
                "{:<16} {} groups over {} rows",
                "Output",
                entries.len(),
                members
            );
        }
        TaskOutput::Aggregates(columns) => {
            println!("{:<16}", "Output");
            for column in columns {
                for (function, value) in &column.results {
                    println!(
                        "  {:<14} {:<8} {}",
                        column.column,
                        function.to_string(),
                        format_aggregate(value)
                    );
                }
            }
        }
    }
}

fn format_aggregate(value: &AggregateValue) -> String {
    match value {
        AggregateValue::Number(n) => format!("{n}"),
        AggregateValue::Single(v) => format!("{v}"),
        AggregateValue::Many(vs) => format!("{} distinct values", vs.len()),
        AggregateValue::NoValue => "no value".to_string(),
    }
}
