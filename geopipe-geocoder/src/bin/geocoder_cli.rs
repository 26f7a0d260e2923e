use clap::Parser;
use geopipe_geocoder::{Geocoder, SearchResult, Type};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "interactive forward geocoder over a hierarchy file", long_about = None)]
struct Args {
    #[arg(long, help = "Path to the hierarchy (.jsonl / .jsonl.gz) or a binary token index.")]
    hierarchy_path: PathBuf,
    #[arg(long, default_value = "", help = "Path to a file with queries, one per line.")]
    queries_path: String,
    #[arg(
        long,
        default_value_t = 5,
        help = "Number of top results to show for every query, -1 to show all."
    )]
    top: i32,
}

fn print_results(geocoder: &Geocoder, results: &[SearchResult], top: i32) {
    println!("Found results: {}", results.len());
    if results.is_empty() {
        return;
    }
    println!("Top results:");

    let hierarchy = geocoder.hierarchy();
    let dictionary = hierarchy.dictionary();
    for (i, result) in results.iter().enumerate() {
        if top >= 0 && i as i32 >= top {
            break;
        }
        print!("  {:016X} [{:.3}]", result.osm_id, result.certainty);
        if let Some(entry) = hierarchy.entry_for_osm_id(result.osm_id) {
            print!(" [");
            let mut delimiter = "";
            for level in Type::ALL {
                if !entry.has_field_in_address(level) {
                    continue;
                }
                let names = entry.normalized_names(level, dictionary);
                print!("{delimiter}{}: {}", level.address_field(), names.main_name());
                delimiter = ", ";
            }
            print!("]");
        }
        println!();
    }
}

fn process_queries_from_file(geocoder: &Geocoder, path: &str, top: i32) -> std::io::Result<()> {
    let file = std::fs::File::open(path)?;
    for line in BufReader::new(file).lines() {
        let query = line?;
        let query = query.trim();
        if query.is_empty() {
            continue;
        }
        println!("{query}");
        print_results(geocoder, &geocoder.process_query(query), top);
        println!();
    }
    Ok(())
}

fn process_queries_interactively(geocoder: &Geocoder, top: i32) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let mut query = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        query.clear();
        if stdin.read_line(&mut query)? == 0 {
            return Ok(());
        }
        let query = query.trim();
        if matches!(query, "q" | ":q" | "quit") {
            return Ok(());
        }
        print_results(geocoder, &geocoder.process_query(query), top);
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut geocoder = Geocoder::new();
    let path = args.hierarchy_path.as_path();
    let is_jsonl = path
        .to_str()
        .is_some_and(|p| p.ends_with(".jsonl") || p.ends_with(".jsonl.gz"));
    let loaded = if is_jsonl {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        geocoder.load_from_jsonl(path, false, threads)
    } else {
        geocoder.load_from_binary_index(path)
    };
    if let Err(e) = loaded {
        log::error!("{e}");
        std::process::exit(2);
    }

    let run = if args.queries_path.is_empty() {
        process_queries_interactively(&geocoder, args.top)
    } else {
        process_queries_from_file(&geocoder, &args.queries_path, args.top)
    };
    if let Err(e) = run {
        log::error!("{e}");
        std::process::exit(2);
    }
}
