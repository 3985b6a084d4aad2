//! `bale refs` command: list the references in an image layout.

use std::path::PathBuf;

use bale_runtime::{Descriptor, Engine};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct RefsArgs {
    /// Path to the OCI image layout
    #[arg(long)]
    pub layout: PathBuf,

    /// Only print reference names
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: RefsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_layout(&args.layout)?;

    let mut refs = Vec::new();
    for name in engine.list_references().await? {
        let descriptor = engine.get_reference(&name).await?;
        refs.push((name, descriptor));
    }

    if args.quiet {
        for (name, _) in &refs {
            println!("{name}");
        }
        return Ok(());
    }

    println!("{}", render(&refs));
    Ok(())
}

fn render(refs: &[(String, Descriptor)]) -> comfy_table::Table {
    let mut table = output::new_table(&["NAME", "MEDIA TYPE", "DIGEST", "SIZE"]);
    for (name, descriptor) in refs {
        table.add_row(vec![
            name.clone(),
            descriptor.media_type.clone(),
            output::short_digest(&descriptor.digest),
            output::format_bytes(descriptor.size.max(0) as u64),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_runtime::oci::media_types;

    #[test]
    fn test_render_rows() {
        let descriptor = Descriptor::for_bytes(media_types::IMAGE_MANIFEST, &[0u8; 2048]);
        let rendered = render(&[("latest".to_string(), descriptor)]).to_string();

        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("latest"));
        assert!(rendered.contains(media_types::IMAGE_MANIFEST));
        assert!(rendered.contains("2.0 KB"));
    }
}
