use anyhow::Result;
use clap::{ArgGroup, Parser};
use mrstream::{EngineConfig, Input, Output, Ports, RunMode};
use std::path::PathBuf;
use tracing::info;

use wordcount::build_job;

#[derive(Parser, Debug)]
#[command(name = "wordcount")]
#[command(about = "WordCount para Hadoop Streaming: una fase por invocación")]
#[command(group(
    ArgGroup::new("modo")
        .required(true)
        .args(["mapper", "reducer", "steps"]),
))]
struct Cli {
    /// Corre el mapper del step (texto crudo -> pairs)
    #[arg(long)]
    mapper: bool,

    /// Corre el reducer del step (pairs ordenados por clave -> pairs)
    #[arg(long)]
    reducer: bool,

    /// Imprime la descripción de los steps como JSON en una línea
    #[arg(long)]
    steps: bool,

    /// Índice del step a correr
    #[arg(long = "step-num", value_name = "N", default_value_t = 0)]
    step_num: usize,

    /// Leer de este archivo en vez de stdin
    #[arg(long, value_name = "ARCHIVO")]
    input: Option<PathBuf>,

    /// Escribir en este archivo en vez de stdout
    #[arg(long, value_name = "ARCHIVO")]
    output: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.mapper {
            RunMode::Mapper {
                step: self.step_num,
            }
        } else if self.reducer {
            RunMode::Reducer {
                step: self.step_num,
            }
        } else {
            RunMode::Describe
        }
    }

    /// Los mismos archivos sirven para la fase que se corra.
    fn ports(&self) -> Ports {
        let input = self
            .input
            .clone()
            .map(Input::File)
            .unwrap_or_default();
        let output = self
            .output
            .clone()
            .map(Output::File)
            .unwrap_or_default();

        Ports {
            map_input: input.clone(),
            map_output: output.clone(),
            reduce_input: input,
            reduce_output: output,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let job = build_job(cli.ports(), config);

    if let Some(stats) = job.run(cli.mode()).await? {
        info!(
            "listo: {} registros leídos, {} pairs escritos",
            stats.records_read, stats.pairs_written
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("wordcount").chain(args.iter().copied()))
    }

    #[test]
    fn mapper_usa_el_step_cero_por_defecto() {
        let cli = parse(&["--mapper"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Mapper { step: 0 });
    }

    #[test]
    fn reducer_con_step_num() {
        let cli = parse(&["--reducer", "--step-num", "2"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Reducer { step: 2 });
    }

    #[test]
    fn steps_describe_el_job() {
        let cli = parse(&["--steps"]).unwrap();
        assert_eq!(cli.mode(), RunMode::Describe);
    }

    #[test]
    fn exige_exactamente_un_modo() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--mapper", "--reducer"]).is_err());
        assert!(parse(&["--steps", "--mapper"]).is_err());
    }

    #[test]
    fn archivos_reemplazan_stdin_y_stdout() {
        let cli = parse(&["--reducer", "--input", "in.txt", "--output", "out/res.txt"]).unwrap();
        let ports = cli.ports();

        assert_eq!(ports.reduce_input, Input::File(PathBuf::from("in.txt")));
        assert_eq!(ports.reduce_output, Output::File(PathBuf::from("out/res.txt")));

        let ports = parse(&["--mapper"]).unwrap().ports();
        assert_eq!(ports.map_input, Input::Stdin);
        assert_eq!(ports.map_output, Output::Stdout);
    }
}
