use std::fs::File;
use std::io::BufReader;

use cp_save::{load, Node, NodePayload};

use crate::args::InspectArgs;
use crate::error::CliError;

pub fn run(args: &InspectArgs) -> Result<(), CliError> {
    let reader = BufReader::new(File::open(&args.save)?);
    let save_file = load(reader, |p| tracing::debug!(progress = p as f64, "loading"))?;

    println!(
        "version: v1={} v2={} v3={}",
        save_file.version.v1, save_file.version.v2, save_file.version.v3
    );
    println!("node count: {}", save_file.tree.node_count());
    println!("flattened size: {} bytes", save_file.tree.calc_size());
    if save_file.ps4_raw_chunks {
        println!("chunk format: ps4 raw chunks");
    }
    for child in &save_file.tree.children {
        print_node(child, 0);
    }
    Ok(())
}

fn print_node(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    match node {
        Node::Blob(bytes) => println!("{indent}<blob, {} bytes>", bytes.len()),
        Node::Object {
            name,
            payload: NodePayload::Leaf(data),
        } => println!("{indent}{name} ({} bytes)", data.len()),
        Node::Object {
            name,
            payload: NodePayload::Children(children),
        } => {
            println!("{indent}{name}/");
            for child in children {
                print_node(child, depth + 1);
            }
        }
    }
}
