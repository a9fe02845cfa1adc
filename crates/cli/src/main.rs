use clap::{Parser, Subcommand};
use epi_core::fhir::{BundleAssembler, CountryKey, Mapper, MapperKind, MissingCasesPolicy};
use epi_core::{persistence::read_records, BundleStore, DeliveryClient};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "epi")]
#[command(about = "Epidemiological records to FHIR bundle CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a JSON record file into a FHIR Bundle
    Convert {
        /// Input record file (JSON array)
        input: PathBuf,
        /// Write the bundle here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Observation shape: complete or reduced
        #[arg(long)]
        mapper: Option<MapperKind>,
        /// Record key holding the country
        #[arg(long)]
        country_key: Option<CountryKey>,
    },
    /// Reverse a FHIR Bundle file into flat records
    Reverse {
        /// Bundle file
        bundle: PathBuf,
        /// Record key to write the country under
        #[arg(long)]
        country_key: Option<CountryKey>,
        /// What to do when an observation carries no case value: fail or zero
        #[arg(long)]
        missing_cases: Option<MissingCasesPolicy>,
    },
    /// POST a FHIR Bundle file to a receiving endpoint
    Send {
        /// Bundle file
        bundle: PathBuf,
        /// Receiving URL
        url: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = epi_core::DEFAULT_DELIVERY_TIMEOUT_SECS)]
        timeout: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Convert {
            input,
            output,
            mapper,
            country_key,
        }) => {
            let records = read_records(&input)?;
            let mapper = Mapper::new(
                mapper.unwrap_or_default(),
                country_key.unwrap_or_default(),
                MissingCasesPolicy::default(),
            );
            let report = BundleAssembler::new(mapper).assemble(&records);

            for skipped in &report.skipped {
                eprintln!("Skipped record {}: {}", skipped.index, skipped.error);
            }
            if let Some(error) = &report.error {
                eprintln!("Error creating bundle: {}", error);
            }

            match output {
                Some(path) => {
                    BundleStore::new(&path).write(&report.bundle)?;
                    println!(
                        "Wrote {} observations to {}",
                        report.bundle.len(),
                        path.display()
                    );
                }
                None => println!("{}", report.bundle.render()?),
            }
        }
        Some(Commands::Reverse {
            bundle,
            country_key,
            missing_cases,
        }) => {
            let bundle = BundleStore::new(&bundle).read()?;
            let mapper = Mapper::new(
                MapperKind::default(),
                country_key.unwrap_or_default(),
                missing_cases.unwrap_or_default(),
            );
            let report = BundleAssembler::new(mapper).reverse(&bundle);

            for failure in &report.failures {
                eprintln!("Cannot reverse entry {}: {}", failure.index, failure.error);
            }
            println!("{}", serde_json::to_string_pretty(&report.records)?);
        }
        Some(Commands::Send {
            bundle,
            url,
            timeout,
        }) => {
            let bundle = BundleStore::new(&bundle).read()?;
            let client = DeliveryClient::new(url, Duration::from_secs(timeout))?;

            let runtime = tokio::runtime::Runtime::new()?;
            match runtime.block_on(client.send(&bundle)) {
                Ok(response) => println!("POST to {} successful: {}", client.url(), response),
                Err(e) => eprintln!("Error sending bundle: {}", e),
            }
        }
        None => {
            println!("Use 'epi --help' for commands");
        }
    }

    Ok(())
}
