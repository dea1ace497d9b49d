//! Tileset inspector binary — dumps the structure of a 3MX scene or a
//! single 3MXB tile without rendering anything.
//!
//! Usage: cargo run --release --bin inspect_tileset -- <PATH> [OPTIONS]
//!
//! PATH is a .3mx scene document, a .3mxb tile file, or a file:// URL.
//!
//! Options:
//!   --depth <N>   Follow child tile references N levels deep (default: 0)
//!   --nodes       Print every node and resource entry, not just counts

use std::sync::Arc;

use threemx::core::{Error, Result};
use threemx::fetch::{base_url, file_name, join, FileFetcher, TileFetcher};
use threemx::format::codec::CodecRegistry;
use threemx::format::decoder::{decode_tile, DecodedTile, ResourcePayload};
use threemx::format::tileset::TilesetDoc;
use threemx::tasks::CancelToken;

#[derive(Default)]
struct Totals {
    tiles: usize,
    nodes: usize,
    meshes: usize,
    textures: usize,
    vertices: usize,
    triangles: usize,
    texture_bytes: usize,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.iter().skip(1).find(|a| !a.starts_with("--")) else {
        eprintln!("usage: inspect_tileset <PATH> [--depth N] [--nodes]");
        std::process::exit(2);
    };
    let depth = parse_usize_arg(&args, "--depth").unwrap_or(0);
    let verbose = args.iter().any(|a| a == "--nodes");

    if let Err(e) = run(path, depth, verbose) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(path: &str, depth: usize, verbose: bool) -> Result<()> {
    let fetcher = Arc::new(FileFetcher);
    let codecs = CodecRegistry::with_builtin();
    let cancel = CancelToken::new();
    let mut totals = Totals::default();

    println!("=== Threemx Tileset Inspector ===");

    // A .3mx document names the root tile; anything else is a tile itself
    let root_url = if path.ends_with(".3mx") {
        let bytes = fetcher.fetch(path)?;
        let doc = TilesetDoc::parse(&bytes)
            .map_err(|e| Error::Tileset(format!("{} is not a valid 3MX document: {}", path, e)))?;
        println!("Document: {} ({} layers)", path, doc.layers.len());
        let layer = doc
            .first_layer()
            .ok_or_else(|| Error::Tileset(format!("{} has no layers", path)))?;
        println!("  SRS:    {}", layer.srs);
        println!("  Origin: {:?}", layer.srs_origin());
        println!("  Offset: {:?}", layer.scene_offset());
        println!("  Root:   {}", layer.root);
        join(&base_url(path), &layer.root)
    } else {
        path.to_string()
    };

    println!();
    walk_tile(
        fetcher.as_ref(),
        &codecs,
        &cancel,
        &root_url,
        None,
        depth,
        0,
        verbose,
        &mut totals,
    )?;

    println!();
    println!(
        "Totals: {} tiles, {} nodes, {} meshes ({} vertices, {} triangles), {} textures ({:.1} KB)",
        totals.tiles,
        totals.nodes,
        totals.meshes,
        totals.vertices,
        totals.triangles,
        totals.textures,
        totals.texture_bytes as f64 / 1024.0
    );
    Ok(())
}

/// Decode one tile, print its contents, and recurse into child tiles.
/// Errors in a child tile are reported and skipped; only the tile passed
/// in propagates its error to the caller.
///
/// `root_base` is the data directory child references resolve against; for
/// the entry tile it is derived per node (`<dir><node_id>/`), matching how
/// deeper references are laid out on disk.
#[allow(clippy::too_many_arguments)]
fn walk_tile(
    fetcher: &dyn TileFetcher,
    codecs: &CodecRegistry,
    cancel: &CancelToken,
    url: &str,
    root_base: Option<&str>,
    depth_left: usize,
    indent: usize,
    verbose: bool,
    totals: &mut Totals,
) -> Result<()> {
    let pad = "  ".repeat(indent);
    let bytes = fetcher.fetch(url)?;
    let Some(tile) = decode_tile(url, &bytes, codecs, cancel)? else {
        return Ok(());
    };

    tally(&tile, totals);
    println!(
        "{}{} (v{}): {} nodes, {} resources, {} bytes",
        pad,
        file_name(url),
        tile.version,
        tile.nodes.len(),
        tile.resources.len(),
        bytes.len()
    );
    if verbose {
        print_details(&tile, indent + 1);
    }

    if depth_left == 0 {
        return Ok(());
    }
    let dir = base_url(url);
    for node in &tile.nodes {
        // The entry tile's nodes each own a data subdirectory
        let child_base = match root_base {
            Some(base) => base.to_string(),
            None => format!("{}{}/", dir, node.id),
        };
        for child in &node.children {
            let child_url = match root_base {
                Some(base) => join(base, child),
                None => join(&dir, child),
            };
            if let Err(e) = walk_tile(
                fetcher,
                codecs,
                cancel,
                &child_url,
                Some(&child_base),
                depth_left - 1,
                indent + 1,
                verbose,
                totals,
            ) {
                eprintln!("{}  error: {}: {}", pad, file_name(&child_url), e);
            }
        }
    }
    Ok(())
}

fn print_details(tile: &DecodedTile, indent: usize) {
    let pad = "  ".repeat(indent);
    for node in &tile.nodes {
        println!(
            "{}node {}: bounds {:?}..{:?}, maxScreenDiameter {}, {} children, {} resources",
            pad,
            node.id,
            node.bounds.min,
            node.bounds.max,
            node.max_screen_diameter,
            node.children.len(),
            node.resources.len()
        );
    }
    for resource in &tile.resources {
        match &resource.payload {
            ResourcePayload::Mesh(mesh) => println!(
                "{}mesh {}: {} vertices, {} triangles, texture {}",
                pad,
                resource.id,
                mesh.positions.len() / 3,
                mesh.indices.len() / 3,
                mesh.texture.as_deref().unwrap_or("-")
            ),
            ResourcePayload::Texture(bytes) => {
                println!("{}texture {}: {} bytes", pad, resource.id, bytes.len())
            }
        }
    }
}

fn tally(tile: &DecodedTile, totals: &mut Totals) {
    totals.tiles += 1;
    totals.nodes += tile.nodes.len();
    for resource in &tile.resources {
        match &resource.payload {
            ResourcePayload::Mesh(mesh) => {
                totals.meshes += 1;
                totals.vertices += mesh.positions.len() / 3;
                totals.triangles += mesh.indices.len() / 3;
            }
            ResourcePayload::Texture(bytes) => {
                totals.textures += 1;
                totals.texture_bytes += bytes.len();
            }
        }
    }
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
