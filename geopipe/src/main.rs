use clap::Parser;
use geopipe::config::GenerateInfo;
use geopipe::translator::FeatureTargets;
use geopipe::GeneratorError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "OSM to server-side geocoding artifact generator", long_about = None)]
struct Args {
    #[arg(long, default_value = "", help = "Input osm area file.")]
    osm_file_name: String,
    #[arg(long, default_value = "xml", help = "Input osm area file type [xml, o5m, pbf].")]
    osm_file_type: String,
    #[arg(
        long,
        default_value = "map",
        help = "Type of storage for intermediate points representation. Available: raw, map, mem."
    )]
    node_storage: String,
    #[arg(long, default_value = "", help = "Directory the generated artifacts are put into.")]
    data_path: String,
    #[arg(long, default_value = "", help = "Directory for intermediate data; <data_path>/tmp by default.")]
    intermediate_data_path: String,
    #[arg(long, default_value = "", help = "Base name for produced files.")]
    output: String,

    #[arg(long, help = "1st pass - create nodes/ways/relations data.")]
    preprocess: bool,
    #[arg(long, help = "2nd pass - generate all intermediate feature files.")]
    generate_features: bool,
    #[arg(long, help = "Generate intermediate features for regions.")]
    generate_region_features: bool,
    #[arg(long, help = "Generate intermediate features for streets.")]
    generate_streets_features: bool,
    #[arg(long, help = "Generate intermediate features for geo objects.")]
    generate_geo_objects_features: bool,
    #[arg(long, help = "Generate regions index and borders for the reverse geocoder.")]
    generate_regions: bool,
    #[arg(long, help = "Generate regions key-value for the reverse geocoder.")]
    generate_regions_kv: bool,
    #[arg(long, help = "Generate objects index for the reverse geocoder.")]
    generate_geo_objects_index: bool,
    #[arg(long, help = "Generate the forward geocoder token index.")]
    generate_geocoder_token_index: bool,

    #[arg(long, default_value = "", help = "Input .tmp file with regions.")]
    regions_features: String,
    #[arg(long, default_value = "", help = "Input regions index file.")]
    regions_index: String,
    #[arg(long, default_value = "", help = "Regions key-value file.")]
    regions_key_value: String,
    #[arg(long, default_value = "", help = "Input .tmp file with streets.")]
    streets_features: String,
    #[arg(long, default_value = "", help = "Input .tmp file with geo objects.")]
    geo_objects_features: String,
    #[arg(long, default_value = "", help = "Output streets key-value file.")]
    streets_key_value: String,
    #[arg(long, default_value = "", help = "Output geo objects key-value file.")]
    geo_objects_key_value: String,
    #[arg(long, default_value = "", help = "Path to a file with ids of nodes to add to the objects index.")]
    nodes_list_path: String,
    #[arg(long, default_value = "", help = "Output file with ids of POIs granted an inherited address.")]
    ids_without_addresses: String,
    #[arg(long, default_value = "", help = "Input key-value file (.jsonl or .jsonl.gz) for the geocoder.")]
    key_value: String,
    #[arg(long, help = "Provide more detailed output.")]
    verbose: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Option parse errors exit with code 1; clap handles --help and
            // --version itself.
            let _ = e.print();
            let code = if e.use_stderr() { 1 } else { 0 };
            std::process::exit(code);
        }
    };

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if !geopipe_core::coding::is_little_endian() {
        log::error!("only little-endian architectures are supported");
        std::process::exit(2);
    }

    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(2);
    }
}

fn run(args: Args) -> Result<(), GeneratorError> {
    log::info!("starting at {}", chrono::Local::now().to_rfc3339());
    let info = GenerateInfo::new(
        args.osm_file_name.clone(),
        &args.osm_file_type,
        &args.node_storage,
        &args.data_path,
        &args.intermediate_data_path,
        args.output.clone(),
        args.verbose,
    )?;

    if args.preprocess {
        log::info!("generating intermediate data");
        geopipe::translator::generate_intermediate_data(&info)?;
    }

    let targets = FeatureTargets {
        regions: args.generate_features || args.generate_region_features,
        streets: args.generate_features || args.generate_streets_features,
        geo_objects: args.generate_features || args.generate_geo_objects_features,
    };
    if targets.any() {
        log::info!("generating classified features");
        geopipe::translator::generate_features(&info, targets)?;
    }

    let pick = |explicit: &str, bucket: &str| -> PathBuf {
        if explicit.is_empty() {
            info.tmp_feature_file(bucket)
        } else {
            PathBuf::from(explicit)
        }
    };
    let regions_features = pick(&args.regions_features, "regions");
    let streets_features = pick(&args.streets_features, "streets");
    let geo_objects_features = pick(&args.geo_objects_features, "geo_objects");

    let regions_index = if args.regions_index.is_empty() {
        info.out_file(".regions.idx")
    } else {
        PathBuf::from(&args.regions_index)
    };
    let regions_kv = if args.regions_key_value.is_empty() {
        info.out_file(".regions.jsonl")
    } else {
        PathBuf::from(&args.regions_key_value)
    };

    if args.generate_regions {
        geopipe::covering_stage::generate_regions_index(
            &regions_index,
            &regions_features,
            info.threads_count,
        )?;
    }

    if args.generate_regions_kv {
        geopipe::regions::generate_regions(&regions_features, &regions_kv, info.threads_count)?;
    }

    if !args.streets_key_value.is_empty() {
        geopipe::streets::generate_streets(
            &regions_index,
            &regions_kv,
            &streets_features,
            &geo_objects_features,
            PathBuf::from(&args.streets_key_value).as_path(),
            info.threads_count,
        )?;
    }

    if !args.geo_objects_key_value.is_empty() {
        let ids_without_addresses = if args.ids_without_addresses.is_empty() {
            info.out_file(".poi_ids")
        } else {
            PathBuf::from(&args.ids_without_addresses)
        };
        geopipe::geo_objects::generate_geo_objects(
            &regions_index,
            &regions_kv,
            &geo_objects_features,
            &ids_without_addresses,
            PathBuf::from(&args.geo_objects_key_value).as_path(),
            info.threads_count,
        )?;
    }

    if args.generate_geo_objects_index {
        let nodes_list = if args.nodes_list_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&args.nodes_list_path))
        };
        geopipe::covering_stage::generate_geo_objects_index(
            &info.out_file(".geo_objects.idx"),
            &geo_objects_features,
            Some(streets_features.as_path()),
            nodes_list.as_deref(),
            info.threads_count,
        )?;
    }

    if args.generate_geocoder_token_index {
        if args.key_value.is_empty() {
            return Err(GeneratorError::Configuration("unspecified key-value file".into()));
        }
        let mut geocoder = geopipe_geocoder::Geocoder::new();
        geocoder.load_from_jsonl(
            PathBuf::from(&args.key_value).as_path(),
            false,
            info.threads_count,
        )?;
        let token_index = info.out_file(".tokidx");
        geocoder.save_to_binary_index(&token_index)?;
        log::info!("token index saved to {}", token_index.display());
    }

    Ok(())
}
