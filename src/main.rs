//! Chunked generation of elevation-class regridding operators.
//!
//! Planning mode (no `--runchunk`) scans the ice mask, splits the globe
//! into memory-bounded chunks and emits a makefile with one target per
//! chunk. Execution mode (`--runchunk id,j0,i0,j1,i1`) processes one
//! chunk: it builds the chunk's validity mask, then writes two artifact
//! files, the mismatched section on the ocean grid and the standard
//! section on the atmosphere grid derived from it.
//!
//! # Usage
//!
//! ```bash
//! icegrid g1qx1 g1mx1m ghxh etopo1_ice.json topo.json -o global_ec
//! make -f global_ec.mk
//! ```

use clap::Parser;
use std::path::PathBuf;

use icegrid::chunk::{
    chunk_validity_mask, plan_chunks, write_chunk_makefile, ChunkParams, ChunkSpec,
    DEFAULT_CHUNK_THRESHOLD,
};
use icegrid::elevation::elevation_classes;
use icegrid::errors::{IcegridError, IcegridResult};
use icegrid::exchange::LogProgress;
use icegrid::grid::{grid_by_name, GridSpec, EQ_RAD};
use icegrid::input::{fgice_to_ocean, read_fields, take_field};
use icegrid::operator::{downsample_display, Triplet};
use icegrid::output::{ArtifactBlock, ChunkWriter};
use icegrid::regrid::{
    assemble_standard, display_overlap, GcmRegridder, MismatchedRegridder, OperatorKind,
    RegridMatrices, RegridParams, GENERATION_ORDER,
};
use icegrid::sparse::SparseDim;
use ndarray::{Array2, ArrayView2};

/// Generate conservative regridding operators between a coarse GCM grid,
/// a fine ice grid and the derived elevation-class grid
#[derive(Parser, Debug)]
#[command(name = "icegrid")]
struct Args {
    /// Ocean (coarse) grid name
    grid_o: String,

    /// Ice (fine) grid name
    grid_i: String,

    /// Display grid name for the downsampled plotting operators
    grid_i2: String,

    /// File with the fine-grid ice cover and ice-top elevation fields
    elevmask: PathBuf,

    /// File with the GCM ocean-cover fields (FOCEAN, FOCEANF)
    topo: PathBuf,

    /// Ice-cover variable in the elevmask file
    #[arg(short = 'm', long, default_value = "FGICE1m")]
    mask_var: String,

    /// Ice-top elevation variable in the elevmask file
    #[arg(short = 'e', long, default_value = "ZICETOP1m")]
    elev_var: String,

    /// Elevation classes as low,high,step [m]
    #[arg(short = 'E', long, default_value = "-100,3700,200")]
    elev_classes: String,

    /// Base name for the generated artifacts
    #[arg(short, long, default_value = "global_ec")]
    output: String,

    /// Write raw (conservative, unscaled) operators
    #[arg(short, long)]
    raw: bool,

    /// Earth radius [m]
    #[arg(short = 'R', long, default_value_t = EQ_RAD)]
    radius: f64,

    /// Fine ice cells per chunk before a new chunk opens
    #[arg(long, default_value_t = DEFAULT_CHUNK_THRESHOLD)]
    chunk_threshold: usize,

    /// Execute one chunk: id,j0,i0,j1,i1 (emitted by planning mode)
    #[arg(short = 'c', long)]
    runchunk: Option<String>,
}

fn parse_elev_classes(arg: &str) -> IcegridResult<Vec<f64>> {
    let fields: Vec<f64> = arg
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| IcegridError::BadElevationClasses(arg.to_string()))?;
    if fields.len() != 3 {
        return Err(IcegridError::BadElevationClasses(format!(
            "{arg} (expected low,high,step)"
        )));
    }
    elevation_classes(fields[0], fields[1], fields[2])
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("icegrid: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> IcegridResult<()> {
    let grid_o = grid_by_name(&args.grid_o)?;
    let grid_i = grid_by_name(&args.grid_i)?;
    let grid_i2 = grid_by_name(&args.grid_i2)?;
    grid_i.multiple_of(&grid_o)?;
    grid_i.multiple_of(&grid_i2)?;
    let hcdefs = parse_elev_classes(&args.elev_classes)?;

    let mut elev_fields = read_fields(&args.elevmask)?;
    let fgice_i = take_field(&mut elev_fields, &args.elevmask, &args.mask_var, &grid_i)?;
    let elev_i = take_field(&mut elev_fields, &args.elevmask, &args.elev_var, &grid_i)?;
    drop(elev_fields);

    let fgice_o = fgice_to_ocean(&grid_o, &grid_i, fgice_i.view(), args.radius)?;

    match &args.runchunk {
        None => plan(args, &grid_o, &grid_i, fgice_o.view(), fgice_i.view()),
        Some(desc) => {
            let chunk = ChunkSpec::parse(desc)?;
            let elevmask = chunk_validity_mask(
                &chunk,
                &grid_o,
                &grid_i,
                fgice_o.view(),
                fgice_i.view(),
                elev_i.view(),
            )?;
            execute(args, &chunk, &grid_o, &grid_i, &grid_i2, &hcdefs, &elevmask)
        }
    }
}

/// Planning mode: chunk the scan and emit the build script that runs it.
fn plan(
    args: &Args,
    grid_o: &GridSpec,
    grid_i: &GridSpec,
    fgice_o: ArrayView2<'_, f64>,
    fgice_i: ArrayView2<'_, f64>,
) -> IcegridResult<()> {
    let params = ChunkParams {
        threshold: args.chunk_threshold,
    };
    let chunks = plan_chunks(grid_o, grid_i, fgice_o, fgice_i, &params)?;
    log::info!("planned {} chunks", chunks.len());

    let argv: Vec<String> = std::env::args().collect();
    let mk_path = write_chunk_makefile(&args.output, &argv, &chunks)?;
    log::info!("wrote {mk_path}; run `make -f {mk_path}`");
    Ok(())
}

/// Execution mode: both sections of one chunk.
fn execute(
    args: &Args,
    chunk: &ChunkSpec,
    grid_o: &GridSpec,
    grid_i: &GridSpec,
    grid_i2: &GridSpec,
    hcdefs: &[f64],
    elevmask: &Array2<f64>,
) -> IcegridResult<()> {
    let params = RegridParams {
        scale: !args.raw,
        eq_rad: args.radius,
    };

    let mut topo_fields = read_fields(&args.topo)?;
    let focean_m = take_field(&mut topo_fields, &args.topo, "FOCEAN", grid_o)?;
    let focean_p = take_field(&mut topo_fields, &args.topo, "FOCEANF", grid_o)?;
    drop(topo_fields);

    // Mismatched section: ocean grid, reconciled against the GCM's
    // ocean-cover fields.
    {
        let ocean = assemble_standard(
            "Ocean",
            grid_o,
            grid_i,
            hcdefs,
            elevmask.view(),
            &params,
            LogProgress,
        )?;
        let mm = MismatchedRegridder::new(ocean, focean_p, focean_m)?;
        let rm = mm.regrid_matrices(elevmask.view())?;
        write_section(
            args, chunk, "mismatched", &mm.inner, grid_i, grid_i2, &rm, &params,
        )?;
    }

    // Standard section: atmosphere grid derived from the ocean grid.
    let grid_a = grid_o.atmosphere_from_ocean()?;
    let atmos = assemble_standard(
        "Atmosphere",
        &grid_a,
        grid_i,
        hcdefs,
        elevmask.view(),
        &params,
        LogProgress,
    )?;
    let rm = atmos.regrid_matrices(elevmask.view());
    write_section(
        args, chunk, "standard", &atmos, grid_i, grid_i2, &rm, &params,
    )
}

/// Generate one section's operators in the fixed order, downsampling
/// the two fine-grid-row operators, and flush each before the next is
/// built.
#[allow(clippy::too_many_arguments)]
fn write_section(
    args: &Args,
    chunk: &ChunkSpec,
    runtype: &str,
    gcm: &GcmRegridder,
    grid_i: &GridSpec,
    grid_i2: &GridSpec,
    rm: &RegridMatrices<'_>,
    params: &RegridParams,
) -> IcegridResult<()> {
    let path = PathBuf::from(format!("{}-{runtype}-{:02}", args.output, chunk.id));
    log::info!("generating {runtype} section -> {}", path.display());
    let mut writer = ChunkWriter::create(path)?;
    writer.write_block(&ArtifactBlock::Metadata {
        runtype: runtype.to_string(),
        chunk: *chunk,
        grid_a: gcm.grid_a.clone(),
        grid_i: grid_i.clone(),
        grid_i2: grid_i2.clone(),
        hcdefs: gcm.hcdefs.clone(),
        indexing: gcm.indexing.clone(),
        scale: params.scale,
    })?;

    // Shared registries keep dense assignments consistent between the
    // operators of the section.
    let mut dim_a = SparseDim::new(gcm.grid_a.ncells());
    let mut dim_i = SparseDim::new(grid_i.ncells());
    let mut dim_e = SparseDim::new(gcm.indexing.extent());
    let mut dim_i2 = SparseDim::new(grid_i2.ncells());
    // Display overlap, computed once dimI is fully realized
    let mut i2vi: Option<Vec<Triplet>> = None;

    for kind in GENERATION_ORDER {
        let (op, dims) = match kind {
            OperatorKind::AvI => (
                rm.matrix(kind, &mut dim_a, &mut dim_i, params),
                ["dimA", "dimI"],
            ),
            OperatorKind::EvI => (
                rm.matrix(kind, &mut dim_e, &mut dim_i, params),
                ["dimE", "dimI"],
            ),
            OperatorKind::IvE => (
                rm.matrix(kind, &mut dim_i, &mut dim_e, params),
                ["dimI", "dimE"],
            ),
            OperatorKind::IvA => (
                rm.matrix(kind, &mut dim_i, &mut dim_a, params),
                ["dimI", "dimA"],
            ),
            OperatorKind::AvE => (
                rm.matrix(kind, &mut dim_a, &mut dim_e, params),
                ["dimA", "dimE"],
            ),
        };

        writer.write_operator(&kind.to_string(), dims, &op)?;
        // The fine-grid-row pair gets a display companion right away,
        // while the full operator is still resident
        if matches!(kind, OperatorKind::IvE | OperatorKind::IvA) {
            let overlap = i2vi.get_or_insert_with(|| {
                display_overlap(grid_i2, grid_i, &dim_i, &mut dim_i2, params.eq_rad)
            });
            let small = downsample_display(&op, overlap, dim_i2.dense_extent(), params.scale);
            let name = if kind == OperatorKind::IvE {
                "I2vE"
            } else {
                "I2vA"
            };
            writer.write_operator(name, ["dimI2", dims[1]], &small)?;
        }
    }

    let grid_a = &gcm.grid_a;
    writer.write_dim(
        "dimA",
        &[grid_a.jm, grid_a.im],
        "GCM ('Atmosphere') Grid",
        &dim_a,
    )?;
    writer.write_dim(
        "dimE",
        &[gcm.nhc(), grid_a.jm, grid_a.im],
        "Elevation Grid",
        &dim_e,
    )?;
    writer.write_dim(
        "dimI",
        &[grid_i.jm, grid_i.im],
        "Fine-scale ('Ice') Grid",
        &dim_i,
    )?;
    writer.write_dim(
        "dimI2",
        &[grid_i2.jm, grid_i2.im],
        "Reduction of fine-scale grid, for plotting",
        &dim_i2,
    )?;
    let final_path = writer.finalize()?;
    log::info!("finalized {}", final_path.display());
    Ok(())
}
