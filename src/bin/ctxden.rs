use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ctxden::ctxcluster::cluster_stats;
use ctxden::ctxdenoise::{denoise_clustered, denoise_iterated, denoise_pass, gather_patch_stats};
use ctxden::ctxestimate::{estimate_noise, quorum_stats, DEFAULT_MAX_TERMS, DEFAULT_TOLERANCE};
use ctxden::ctximage::{add_noise, compare_images, load_pbm, median_filter, save_pbm};
use ctxden::ctxshared::percent;
use ctxden::ctxstructs::{ClusterConfig, DenoiseConfig, MissingContext, TemplateConfig};
use ctxden::ctxtemplate::{Norm, Template};
use ctxden::{load_stats, save_stats, BitImage, ContextTree, DenoiseRule};
use env_logger::Builder;
use env_logger::Env;
use log::{info, warn};
use log::LevelFilter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Enable console output in addition to file logging
    #[clap(long, global = true)]
    console: bool,

    /// Write the log to this directory instead of the terminal
    #[clap(long, value_parser, global = true)]
    log_dir: Option<String>,

    /// Override the log file name [default: ctxden.log]
    #[clap(long, value_parser, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gather context statistics from one or more images into a stats file
    Gather {
        /// Noisy input PBM files
        #[clap(short, long, value_parser, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Prefiltered images to take contexts from, one per input
        #[clap(short, long, value_parser, num_args = 1..)]
        context: Vec<PathBuf>,

        /// Statistics file; merged into when it already exists
        #[clap(short, long, value_parser)]
        output: PathBuf,

        #[clap(flatten)]
        template: TemplateArgs,
    },

    /// Denoise an image
    Denoise {
        /// Noisy input PBM file
        #[clap(short, long, value_parser)]
        input: PathBuf,

        /// Denoised output PBM file
        #[clap(short, long, value_parser)]
        output: PathBuf,

        /// Prefiltered image to take contexts from
        #[clap(short, long, value_parser)]
        context: Option<PathBuf>,

        /// Take contexts from a median-filtered copy of the input with this window radius
        #[clap(long, value_parser, conflicts_with = "context")]
        median: Option<usize>,

        /// Use these statistics instead of gathering them from the input
        #[clap(short, long, value_parser)]
        stats: Option<PathBuf>,

        #[clap(flatten)]
        template: TemplateArgs,

        #[clap(flatten)]
        channel: ChannelArgs,

        /// Decision rule: majority, bayes or dude
        #[clap(short, long, value_parser, default_value = "majority")]
        rule: DenoiseRule,

        /// Gather/denoise rounds when statistics come from the input itself
        #[clap(long, value_parser, default_value_t = 1)]
        iterations: u32,

        /// Also pool contexts within this Hamming distance
        #[clap(long, value_parser)]
        neighbors: Option<usize>,

        /// Cluster the statistics before denoising
        #[clap(long)]
        cluster: bool,

        #[clap(flatten)]
        clustering: ClusterArgs,

        /// Abort on contexts missing from the statistics instead of keeping the pixel
        #[clap(long)]
        fail_missing: bool,
    },

    /// Print a summary of a statistics file
    Analyze {
        /// Statistics file
        #[clap(value_parser)]
        stats: PathBuf,

        /// Also list every context
        #[clap(long)]
        dump: bool,

        /// Cluster the statistics and report the result
        #[clap(long)]
        cluster: bool,

        #[clap(flatten)]
        clustering: ClusterArgs,
    },

    /// Compare an image against a reference and write the difference image
    Compare {
        /// Reference PBM file
        #[clap(value_parser)]
        reference: PathBuf,

        /// PBM file to compare
        #[clap(value_parser)]
        other: PathBuf,

        /// Difference (XOR) output PBM file
        #[clap(short, long, value_parser, default_value = "difference.pbm")]
        output: PathBuf,
    },

    /// Median-filter an image, e.g. to produce a context image
    Median {
        /// Input PBM file
        #[clap(short, long, value_parser)]
        input: PathBuf,

        /// Filtered output PBM file
        #[clap(short, long, value_parser)]
        output: PathBuf,

        /// Window radius
        #[clap(short, long, value_parser, default_value_t = 1)]
        radius: usize,
    },

    /// Estimate the channel flip probabilities of a noisy image
    Estimate {
        /// Noisy input PBM file
        #[clap(value_parser)]
        input: PathBuf,

        #[clap(flatten)]
        template: TemplateArgs,

        /// Quorum values at each end treated as uniform contexts
        #[clap(long, value_parser, default_value_t = DEFAULT_MAX_TERMS)]
        max_terms: usize,

        /// Search tolerance
        #[clap(long, value_parser, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Build a template, print it and optionally save it
    Template {
        #[clap(flatten)]
        template: TemplateArgs,

        /// Keep only the closest offsets
        #[clap(short = 'k', long, value_parser)]
        samples: Option<usize>,

        /// Template output file
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Pass an image through a binary asymmetric channel
    Noise {
        /// Clean input PBM file
        #[clap(short, long, value_parser)]
        input: PathBuf,

        /// Noisy output PBM file
        #[clap(short, long, value_parser)]
        output: PathBuf,

        #[clap(flatten)]
        channel: ChannelArgs,

        /// Random seed
        #[clap(long, value_parser, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(ClapArgs, Debug)]
struct TemplateArgs {
    /// Template file (two rows: row offsets, column offsets)
    #[clap(short, long, value_parser)]
    template: Option<PathBuf>,

    /// Radius of the ball template used when no file is given
    #[clap(long, value_parser, default_value_t = 4)]
    radius: u32,

    /// Norm of the ball template: 1, 2 or inf
    #[clap(long, value_parser, default_value = "2")]
    norm: Norm,

    /// Include the center pixel in the ball template
    #[clap(long)]
    include_center: bool,
}

impl TemplateArgs {
    fn build(&self) -> Result<Template> {
        let template = match &self.template {
            Some(path) => Template::load(path)
                .with_context(|| format!("reading template {}", path.display()))?,
            None => {
                let config = TemplateConfig {
                    radius: self.radius,
                    norm: self.norm,
                    include_center: self.include_center,
                };
                if let Err(e) = config.validate() {
                    bail!(e);
                }
                Template::ball(config.radius, config.norm, config.include_center)?
            }
        };
        info!("Template (k={}):\n{}", template.len(), template);
        Ok(template)
    }
}

#[derive(ClapArgs, Debug)]
struct ChannelArgs {
    /// Probability of a 0 flipping to 1
    #[clap(long, value_parser)]
    p01: Option<f64>,

    /// Probability of a 1 flipping to 0
    #[clap(long, value_parser)]
    p10: Option<f64>,

    /// Total error rate, split evenly between both directions
    #[clap(long, value_parser, default_value_t = 0.05)]
    perr: f64,
}

impl ChannelArgs {
    fn probabilities(&self) -> (f64, f64) {
        let half = self.perr / 2.0;
        (self.p01.unwrap_or(half), self.p10.unwrap_or(half))
    }
}

#[derive(ClapArgs, Debug)]
struct ClusterArgs {
    /// Largest distance at which a context joins a cluster
    #[clap(long, value_parser, default_value_t = 10)]
    max_distance: usize,

    /// Minimum occurrences for a context to become a cluster center
    #[clap(long, value_parser, default_value_t = 100)]
    min_occurrences: u64,

    /// Maximum number of clusters
    #[clap(long, value_parser, default_value_t = 10_000)]
    max_clusters: usize,
}

impl ClusterArgs {
    fn config(&self) -> ClusterConfig {
        ClusterConfig {
            max_distance: self.max_distance,
            min_occurrences: self.min_occurrences,
            max_clusters: self.max_clusters,
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let default_log_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let mut builder = Builder::from_env(Env::new().default_filter_or(default_log_level));

    #[cfg(feature = "trace_tree")]
    builder.filter_module("ctxden::ctxtree", LevelFilter::Trace);

    if let Some(dir) = &args.log_dir {
        let log_file = args.log_file.as_deref().unwrap_or("ctxden.log");
        let log_path = Path::new(dir).join(log_file);
        std::fs::create_dir_all(dir)?;
        let file = File::create(&log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    } else if !args.console {
        // Without --console only warnings reach the terminal
        builder.filter_level(LevelFilter::Warn);
    }

    builder.init();
    info!(
        "Logging initialized with console={}, log_dir={:?}, log_file={:?}",
        args.console, args.log_dir, args.log_file
    );
    Ok(())
}

fn read_image(path: &Path) -> Result<BitImage> {
    load_pbm(path).with_context(|| format!("reading image {}", path.display()))
}

fn write_image(path: &Path, image: &BitImage) -> Result<()> {
    save_pbm(path, image).with_context(|| format!("writing image {}", path.display()))
}

fn read_stats(path: &Path) -> Result<ContextTree> {
    load_stats(path).with_context(|| format!("reading statistics {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("{} {}", ctxden::get_version(), ctxden::get_build_info());
    info!(
        "Command line: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    match &args.command {
        Command::Gather {
            input,
            context,
            output,
            template,
        } => run_gather(input, context, output, template),
        Command::Denoise {
            input,
            output,
            context,
            median,
            stats,
            template,
            channel,
            rule,
            iterations,
            neighbors,
            cluster,
            clustering,
            fail_missing,
        } => {
            let (p01, p10) = channel.probabilities();
            let config = DenoiseConfig {
                p01,
                p10,
                rule: *rule,
                missing: if *fail_missing {
                    MissingContext::Fail
                } else {
                    MissingContext::Keep
                },
                iterations: *iterations,
                neighbor_distance: *neighbors,
                template: TemplateConfig {
                    radius: template.radius,
                    norm: template.norm,
                    include_center: template.include_center,
                },
                cluster: cluster.then(|| clustering.config()),
            };
            let context = match (context, median) {
                (Some(path), _) => ContextSource::File(path.as_path()),
                (None, Some(radius)) => ContextSource::Median(*radius),
                (None, None) => ContextSource::Noisy,
            };
            run_denoise(input, output, context, stats.as_deref(), template, &config)
        }
        Command::Analyze {
            stats,
            dump,
            cluster,
            clustering,
        } => run_analyze(stats, *dump, cluster.then(|| clustering.config())),
        Command::Compare {
            reference,
            other,
            output,
        } => run_compare(reference, other, output),
        Command::Median {
            input,
            output,
            radius,
        } => {
            let filtered = median_filter(&read_image(input)?, *radius);
            write_image(output, &filtered)
        }
        Command::Estimate {
            input,
            template,
            max_terms,
            tolerance,
        } => {
            let template = template.build()?;
            let noisy = read_image(input)?;
            let stats = quorum_stats(&noisy, &noisy, &template)?;
            let (p01, p10) = estimate_noise(&stats, *max_terms, *tolerance)?;
            println!("P(0->1)={:.6}", p01);
            println!("P(1->0)={:.6}", p10);
            Ok(())
        }
        Command::Template {
            template,
            samples,
            output,
        } => run_template(template, *samples, output.as_deref()),
        Command::Noise {
            input,
            output,
            channel,
            seed,
        } => run_noise(input, output, channel, *seed),
    }
}

fn run_gather(
    inputs: &[PathBuf],
    contexts: &[PathBuf],
    output: &Path,
    template: &TemplateArgs,
) -> Result<()> {
    if !contexts.is_empty() && contexts.len() != inputs.len() {
        bail!(
            "{} context images given for {} inputs",
            contexts.len(),
            inputs.len()
        );
    }
    let template = template.build()?;
    let mut tree = if output.exists() {
        info!("Merging into existing statistics {}", output.display());
        read_stats(output)?
    } else {
        ContextTree::with_patch_len(template.len())?
    };

    for (idx, input) in inputs.iter().enumerate() {
        let noisy = read_image(input)?;
        let context = match contexts.get(idx) {
            Some(path) => read_image(path)?,
            None => noisy.clone(),
        };
        tree = gather_patch_stats(&noisy, &context, &template, Some(tree))
            .with_context(|| format!("gathering statistics from {}", input.display()))?;
    }

    save_stats(output, &tree).with_context(|| format!("writing statistics {}", output.display()))?;
    let summary = tree.summary();
    info!(
        "Wrote {} contexts ({} occurrences) to {}",
        summary.leaves,
        summary.occurrences,
        output.display()
    );
    Ok(())
}

/// Where a denoising run takes its contexts from.
enum ContextSource<'a> {
    Noisy,
    File(&'a Path),
    Median(usize),
}

fn run_denoise(
    input: &Path,
    output: &Path,
    context: ContextSource<'_>,
    stats: Option<&Path>,
    template: &TemplateArgs,
    config: &DenoiseConfig,
) -> Result<()> {
    config.validate()?;
    let template = template.build()?;
    let noisy = read_image(input)?;
    let prefiltered = match context {
        ContextSource::Noisy => None,
        ContextSource::File(path) => Some(read_image(path)?),
        ContextSource::Median(radius) => Some(median_filter(&noisy, radius)),
    };
    info!(
        "Denoising {} ({}x{}) with rule={}, p01={}, p10={}",
        input.display(),
        noisy.width,
        noisy.height,
        config.rule,
        config.p01,
        config.p10
    );

    let report = match stats {
        Some(path) => {
            if config.iterations > 1 {
                warn!("--iterations is ignored with external statistics");
            }
            let tree = read_stats(path)?;
            let context_image = prefiltered.as_ref().unwrap_or(&noisy);
            let result = match &config.cluster {
                Some(cluster) => {
                    denoise_clustered(&noisy, context_image, &template, &tree, cluster, config)
                }
                None => denoise_pass(&noisy, context_image, &template, &tree, config),
            };
            result.with_context(|| format!("denoising {} with {}", input.display(), path.display()))?
        }
        None => denoise_iterated(&noisy, prefiltered.as_ref(), &template, config)
            .with_context(|| format!("denoising {}", input.display()))?,
    };

    write_image(output, &report.output)?;
    info!(
        "Wrote {}: {} pixels changed ({:.3}%), {} contexts without statistics",
        output.display(),
        report.changed(),
        percent(report.changed() as u64, noisy.len() as u64),
        report.missing
    );
    Ok(())
}

fn run_analyze(path: &Path, dump: bool, cluster: Option<ClusterConfig>) -> Result<()> {
    let tree = read_stats(path)?;
    let summary = tree.summary();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "file:        {}", path.display())?;
    writeln!(out, "patch size:  {}", tree.patch_len())?;
    writeln!(out, "contexts:    {}", summary.leaves)?;
    writeln!(out, "nodes:       {}", summary.nodes)?;
    writeln!(out, "occurrences: {}", summary.occurrences)?;
    writeln!(
        out,
        "ones:        {} ({:.2}%)",
        summary.ones,
        percent(summary.ones, summary.occurrences)
    )?;
    if dump {
        tree.write_dump(&mut out)?;
    }
    if let Some(config) = cluster {
        let outcome = cluster_stats(&tree, &config)?;
        writeln!(out, "clusters:    {}", outcome.clusters)?;
        writeln!(out, "assigned:    {}", outcome.assigned_points)?;
        writeln!(
            out,
            "discarded:   {} ({} occurrences)",
            outcome.discarded_points, outcome.discarded_occurrences
        )?;
        writeln!(out, "split loss:  {}", outcome.split_loss)?;
        if dump {
            outcome.tree.write_dump(&mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn run_compare(reference: &Path, other: &Path, output: &Path) -> Result<()> {
    let cmp = compare_images(&read_image(reference)?, &read_image(other)?)
        .with_context(|| format!("comparing {} with {}", reference.display(), other.display()))?;
    let total = cmp.total() as u64;
    let pct = |n: usize| percent(n as u64, total);
    let ones = cmp.n10 + cmp.n11;
    let zeros = cmp.n00 + cmp.n01;
    let equal = cmp.n00 + cmp.n11;
    println!(
        "ref.  0    {:>9} ({:5.2}%) 1    {:>9} ({:5.2}%) total {:>9}",
        zeros, pct(zeros), ones, pct(ones), total
    );
    println!(
        "equal 0->0 {:>9} ({:5.2}%) 1->1 {:>9} ({:5.2}%) total {:>9} ({:5.2}%)",
        cmp.n00, pct(cmp.n00), cmp.n11, pct(cmp.n11), equal, pct(equal)
    );
    println!(
        "diff. 0->1 {:>9} ({:5.2}%) 1->0 {:>9} ({:5.2}%) total {:>9} ({:5.2}%)",
        cmp.n01,
        pct(cmp.n01),
        cmp.n10,
        pct(cmp.n10),
        cmp.differences(),
        pct(cmp.differences())
    );
    write_image(output, &cmp.diff)
}

fn run_template(args: &TemplateArgs, samples: Option<usize>, output: Option<&Path>) -> Result<()> {
    let mut template = args.build()?;
    if let Some(k) = samples {
        template.truncate(k)?;
    }
    print!("{}", template);
    if let Some(path) = output {
        template
            .save(path)
            .with_context(|| format!("writing template {}", path.display()))?;
        info!("Wrote {} offsets to {}", template.len(), path.display());
    }
    Ok(())
}

fn run_noise(input: &Path, output: &Path, channel: &ChannelArgs, seed: u64) -> Result<()> {
    let (p01, p10) = channel.probabilities();
    if !(0.0..=1.0).contains(&p01) || !(0.0..=1.0).contains(&p10) {
        bail!("flip probabilities must lie in [0, 1]");
    }
    let clean = read_image(input)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let (noisy, flipped) = add_noise(&clean, p01, p10, &mut rng);
    write_image(output, &noisy)?;
    info!(
        "Flipped {} of {} pixels ({:.3}%) with p01={}, p10={}",
        flipped,
        clean.len(),
        percent(flipped as u64, clean.len() as u64),
        p01,
        p10
    );
    Ok(())
}
