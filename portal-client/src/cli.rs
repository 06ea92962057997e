//! Headless commands for the `portal` binary.

use std::io::Write;

use portal_core::{initial_values, PortalError, Widget};
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};
use crate::resources::PortalResources;

pub const USAGE: &str = "\
usage: portal [--config PATH] <command>

commands:
  catalogs [--search TEXT]              list catalogs and their services
  fields CATALOG SERVICE                show the input fields of a service
  runs [CATALOG]                        show run history
  execute CATALOG SERVICE [KEY=VALUE]   validate and execute a service";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Catalogs { search: Option<String> },
    Fields { catalog: String, service: String },
    Runs { catalog: Option<String> },
    Execute {
        catalog: String,
        service: String,
        values: Map<String, Value>,
    },
}

/// Parse the command line, skipping `--config PATH`.
pub fn parse_args<I>(args: I) -> ClientResult<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut positional = Vec::new();
    let mut search = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                args.next();
            }
            "--search" => {
                search = Some(args.next().ok_or_else(|| usage("--search needs a value"))?);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = positional.next().ok_or_else(|| usage("missing command"))?;
    let command = match command.as_str() {
        "catalogs" => Command::Catalogs { search },
        "runs" => Command::Runs {
            catalog: positional.next(),
        },
        "fields" => {
            let (catalog, service) = service_args(&mut positional)?;
            Command::Fields { catalog, service }
        }
        "execute" => {
            let (catalog, service) = service_args(&mut positional)?;
            let mut values = Map::new();
            for pair in positional.by_ref() {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| usage(&format!("expected KEY=VALUE, got {pair:?}")))?;
                values.insert(key.to_string(), Value::String(value.to_string()));
            }
            Command::Execute {
                catalog,
                service,
                values,
            }
        }
        other => return Err(usage(&format!("unknown command {other:?}"))),
    };
    if let Some(extra) = positional.next() {
        return Err(usage(&format!("unexpected argument {extra:?}")));
    }
    Ok(command)
}

fn service_args(args: &mut impl Iterator<Item = String>) -> ClientResult<(String, String)> {
    let catalog = args.next().ok_or_else(|| usage("missing CATALOG"))?;
    let service = args.next().ok_or_else(|| usage("missing SERVICE"))?;
    Ok((catalog, service))
}

fn usage(message: &str) -> ClientError {
    ClientError::Usage(format!("{message}\n\n{USAGE}"))
}

/// Run `command` against `resources`, writing results to `out`.
pub async fn run_command<W: Write>(
    command: Command,
    resources: &PortalResources,
    out: &mut W,
) -> ClientResult<()> {
    let selection = resources.selection();
    match command {
        Command::Catalogs { search } => {
            selection.set_search(search.as_deref().unwrap_or_default());
            for catalog in resources.filtered_catalogs().await? {
                writeln!(out, "{}\t{}", catalog.slug, catalog.name)?;
                for service in &catalog.actions {
                    writeln!(out, "  {}\t{}", service.slug, service.name)?;
                }
            }
        }
        Command::Fields { catalog, service } => {
            selection.select_service(&catalog, &service);
            resources.catalogs().read().await?;
            let service = resources
                .selected_service()
                .ok_or(PortalError::ServiceNotFound { catalog, service })?;
            let initial = initial_values(&service.fields);
            for field in service.fields.iter() {
                let marker = if field.required { "*" } else { " " };
                let initial = initial.get(&field.slug).map(Value::to_string);
                writeln!(
                    out,
                    "{marker} {}\t{}\t{}\t{}",
                    field.slug,
                    field.label(),
                    widget_name(&field.widget()),
                    initial.as_deref().unwrap_or("-"),
                )?;
            }
        }
        Command::Runs { catalog } => {
            selection.select_catalog(catalog.as_deref());
            for run in resources.run_summaries().await? {
                let created = run
                    .created_at
                    .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    out,
                    "{created}\t{}\t{}\t{:.0}%\t{}",
                    run.service_name.as_deref().unwrap_or("-"),
                    run.status,
                    run.success_ratio * 100.0,
                    run.execution_time,
                )?;
            }
        }
        Command::Execute {
            catalog,
            service,
            values,
        } => {
            selection.select_service(&catalog, &service);
            resources.catalogs().read().await?;
            let selected = resources
                .selected_service()
                .ok_or(PortalError::ServiceNotFound { catalog, service })?;
            let mut form = initial_values(&selected.fields);
            form.extend(values);
            let response = resources.execute_selected(&form).await?;
            let rendered = serde_json::to_string_pretty(&response)
                .map_err(|e| ClientError::Usage(e.to_string()))?;
            writeln!(out, "{rendered}")?;
        }
    }
    Ok(())
}

fn widget_name(widget: &Widget) -> &str {
    match widget {
        Widget::TextInput => "text",
        Widget::NumericInput => "numeric",
        Widget::TextArea => "textarea",
        Widget::Switch => "switch",
        Widget::Unsupported { message } => message,
    }
}
