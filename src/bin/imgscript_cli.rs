//! imgscript CLI
//!
//! Commands: catalog, generate, check, run
//! Outputs JSON to stdout
//! Returns exit code 2 on document failure

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use imgscript_core::{
    coerce::{ParserSet, Value, ValueParser},
    generate::{BuilderRegistry, Generator, RegistryPlan},
    interpret::{Interpreter, TargetObject},
    parse_document,
    resolve::TieBreak,
    TypeCatalog,
};

#[derive(Parser)]
#[command(name = "imgscript-cli")]
#[command(about = "imgscript CLI - declarative image scripting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the API manifest
    #[arg(short, long, default_value = "manifest.json")]
    manifest: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog types
    Catalog,

    /// Emit the registry plan for the manifest
    Generate,

    /// Parse a script and verify every element is dispatchable
    Check {
        /// Path to the script document
        script: PathBuf,
    },

    /// Interpret a script against a recording target
    Run {
        /// Path to the script document
        script: PathBuf,

        /// Load a previously generated plan instead of generating in-process
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Reject ambiguous overloads instead of taking the first declared match
        #[arg(long)]
        strict: bool,
    },
}

/// Demo parser for the opaque `Color` value type (`#RRGGBB`).
struct HexColorParser;

impl ValueParser for HexColorParser {
    fn type_name(&self) -> &str {
        "Color"
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        let hex = text.strip_prefix('#').ok_or("expected leading '#'")?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{text}' is not a #RRGGBB color"));
        }
        Ok(Value::Opaque { type_name: "Color".to_string(), text: text.to_string() })
    }
}

/// Target that records every applied operation; stands in for the pixel
/// engine, which is outside this core.
#[derive(Default)]
struct RecordingTarget {
    operations: Vec<serde_json::Value>,
}

impl TargetObject for RecordingTarget {
    fn apply(&mut self, operation: &str, arguments: &[Value]) -> Result<Option<Value>, String> {
        self.operations.push(serde_json::json!({
            "kind": "call",
            "operation": operation,
            "arguments": arguments,
        }));
        Ok(None)
    }

    fn set(&mut self, property: &str, value: Value) -> Result<(), String> {
        self.operations.push(serde_json::json!({
            "kind": "set",
            "property": property,
            "value": value,
        }));
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let catalog = match TypeCatalog::load_from_file(&cli.manifest) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to load manifest: {}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    let mut parsers = ParserSet::new();
    parsers.register(Box::new(HexColorParser));

    match cli.command {
        Commands::Catalog => {
            let types: Vec<_> = catalog
                .type_names()
                .iter()
                .filter_map(|name| catalog.describe(name).ok())
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "enum": t.is_enum,
                        "constructors": t.constructors.len(),
                        "methods": t.methods.len(),
                        "properties": t.properties.len(),
                    })
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&types).unwrap_or_default());
            ExitCode::SUCCESS
        }

        Commands::Generate => {
            let (plan, failures) = Generator::new(&catalog, &parsers).generate();
            let output = serde_json::json!({
                "plan": plan,
                "failures": failures
                    .iter()
                    .map(|f| serde_json::json!({
                        "name": f.name,
                        "error": f.error.to_string(),
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            if failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Check { script } => {
            let (plan, _) = Generator::new(&catalog, &parsers).generate();
            let registry =
                match BuilderRegistry::load(&plan, &catalog, &parsers, TieBreak::FirstDeclared) {
                    Ok(r) => r,
                    Err(e) => {
                        eprintln!(r#"{{"error": "{}"}}"#, e);
                        return ExitCode::FAILURE;
                    }
                };

            let document = match fs::read_to_string(&script)
                .map_err(|e| e.to_string())
                .and_then(|xml| parse_document(&xml).map_err(|e| e.to_string()))
            {
                Ok(d) => d,
                Err(e) => {
                    println!(r#"{{"valid": false, "error": "{}"}}"#, e);
                    return ExitCode::from(2);
                }
            };

            let unknown: Vec<&str> = document
                .children
                .iter()
                .filter(|c| registry.lookup(&c.name).is_none())
                .map(|c| c.name.as_str())
                .collect();

            let valid = unknown.is_empty();
            let output = serde_json::json!({ "valid": valid, "unknown_elements": unknown });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Run { script, plan, strict } => {
            let plan: RegistryPlan = match plan {
                Some(path) => {
                    match fs::read_to_string(&path)
                        .map_err(|e| e.to_string())
                        .and_then(|json| {
                            serde_json::from_str(&json).map_err(|e| e.to_string())
                        }) {
                        Ok(p) => p,
                        Err(e) => {
                            eprintln!(r#"{{"error": "Failed to load plan: {}"}}"#, e);
                            return ExitCode::FAILURE;
                        }
                    }
                }
                None => Generator::new(&catalog, &parsers).generate().0,
            };

            let tie_break = if strict { TieBreak::Strict } else { TieBreak::FirstDeclared };
            let registry = match BuilderRegistry::load(&plan, &catalog, &parsers, tie_break) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!(r#"{{"error": "{}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };

            let document = match fs::read_to_string(&script)
                .map_err(|e| e.to_string())
                .and_then(|xml| parse_document(&xml).map_err(|e| e.to_string()))
            {
                Ok(d) => d,
                Err(e) => {
                    println!(r#"{{"success": false, "error": "{}"}}"#, e);
                    return ExitCode::from(2);
                }
            };

            let mut target = RecordingTarget::default();
            let mut interpreter = Interpreter::new(&registry);

            match interpreter.run(&document, &mut target) {
                Ok(report) => {
                    let output = serde_json::json!({
                        "success": true,
                        "report": report,
                        "operations": target.operations,
                    });
                    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "state": interpreter.state(),
                        "error": e.to_string(),
                    });
                    println!("{}", serde_json::to_string(&output).unwrap_or_default());
                    ExitCode::from(2)
                }
            }
        }
    }
}
