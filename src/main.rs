use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use itertools::Itertools;
use structopt::StructOpt;
use tracing_subscriber::fmt;

use asebac::config::UserEvent;
use asebac::vm::Vm;
use asebac::{disasm, CompilerOptions, Language, NodeDescription, SourceMetadata};

fn main() {
    if let Err(ref e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), anyhow::Error> {
    let opt = Opt::from_args();

    if let Some((_, filter)) = std::env::vars().find(|x| x.0 == "ASEBAC_TRACE") {
        fmt::Subscriber::builder()
            .with_ansi(true)
            .with_env_filter(filter)
            .init();
    }

    let filename = opt.file;
    let source = fs::read_to_string(&filename)
        .with_context(|| format!("cannot read {}", filename.display()))?;
    let node = match &opt.node_description {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            NodeDescription::from_json(&json)?
        }
        None => NodeDescription::thymio(),
    };
    let language = match opt.language {
        LanguageChoice::Auto => Language::detect(&source),
        LanguageChoice::Fixed(language) => language,
    };
    log::debug!("compiling {} as {} for {}", filename.display(), language, node.name);
    let options = CompilerOptions {
        language,
        factor: opt.factor,
        user_events: opt.events,
    };

    let meta = SourceMetadata::new(&source).with_file(filename.clone());
    let compiled = asebac::compile_source(&meta, &node, &options)?;

    let text = match opt.format {
        Format::Words => compiled.image.iter().join("\n"),
        Format::Hex => compiled
            .image
            .iter()
            .map(|w| format!("{:04x}", w))
            .chunks(8)
            .into_iter()
            .map(|mut line| line.join(" "))
            .join("\n"),
        Format::Json => serde_json::to_string_pretty(&compiled)?,
        Format::Listing => disasm::listing(&compiled.image)?,
    };
    match opt.output {
        Some(path) => {
            let mut file = fs::File::create(&path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            writeln!(file, "{}", text)?;
        }
        None => println!("{}", text),
    }

    if opt.run {
        let mut vm = Vm::new(&node, &compiled.image);
        vm.run_init(opt.max_steps)?;
        for (id, data) in &vm.emitted {
            let name = options
                .user_events
                .get(usize::from(*id))
                .map_or("?", |e| e.name.as_str());
            println!("emit {} {:?}", name, data);
        }
        let used = node.variables_size()..node.max_var_size - 2;
        let nonzero = used
            .filter(|&addr| vm.word(addr) != 0)
            .map(|addr| format!("[{}] = {}", addr, vm.word(addr)))
            .join(", ");
        println!("memory after init: {}", nonzero);
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum LanguageChoice {
    Auto,
    Fixed(Language),
}

impl FromStr for LanguageChoice {
    type Err = asebac::language::UnknownLanguage;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Fixed)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Words,
    Hex,
    Json,
    Listing,
}

impl FromStr for Format {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "words" => Self::Words,
            "hex" => Self::Hex,
            "json" => Self::Json,
            "listing" => Self::Listing,
            other => return Err(format!("unknown output format {:?}", other)),
        })
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "asebac", about = "Compiles robot scripts to VM bytecode")]
struct Opt {
    /// The file to compile
    #[structopt(parse(from_os_str))]
    file: PathBuf,
    /// The (optional) output file
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// simple, l2 or auto
    #[structopt(long, default_value = "auto")]
    language: LanguageChoice,
    /// Scale of fixed-point values
    #[structopt(long, default_value = "100")]
    factor: i16,
    /// JSON description of the target node (Thymio II if absent)
    #[structopt(long = "node-description", parse(from_os_str))]
    node_description: Option<PathBuf>,
    /// User event as name[:size], in id order
    #[structopt(long = "event", number_of_values = 1)]
    events: Vec<UserEvent>,
    /// words, hex, json or listing
    #[structopt(long, default_value = "words")]
    format: Format,
    /// Run the init code on the reference VM
    #[structopt(long)]
    run: bool,
    #[structopt(long = "max-steps", default_value = "100000")]
    max_steps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use asebac::config::DEFAULT_FIXED_FACTOR;

    #[test]
    fn parses_command_line() {
        let opt = Opt::from_iter(&[
            "asebac", "prog.l2", "--language", "auto", "--event", "pos:2", "--event", "ping",
            "--format", "listing", "--run",
        ]);
        assert!(matches!(opt.language, LanguageChoice::Auto));
        assert_eq!(opt.events.len(), 2);
        assert_eq!(opt.factor, DEFAULT_FIXED_FACTOR);
        assert!(matches!(opt.format, Format::Listing));
        assert!(opt.run);
    }
}
