//! Print the entries of a dict file

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use lumen_plugin_api::xml::XmlElement;
use lumen_plugin_api::{Dict, DictItem, ItemFactory};

use super::HostArgs;

#[derive(Args)]
pub struct DictArgs {
    /// XML dict file
    pub file: PathBuf,
}

pub fn run(host: &HostArgs, args: DictArgs) -> Result<()> {
    // Modules may define item types used in the file.
    let config = host.load_config()?;
    let registry = host.bring_up(&config)?;

    let factory: std::sync::Arc<dyn ItemFactory> = registry.item_types().clone();
    let mut dict = Dict::with_factory(factory);
    dict.load_from_file(&args.file)
        .with_context(|| format!("Failed to read dict {}", args.file.display()))?;

    if dict.is_empty() {
        println!("{} has no entries", args.file.display());
        return Ok(());
    }
    for (key, item) in dict.iter() {
        println!("{key} ({}) = {}", item.item_type(), format_value(item)?);
    }
    Ok(())
}

fn format_value(item: &dyn DictItem) -> Result<String> {
    let mut node = XmlElement::new("item");
    item.serialize(&mut node)?;
    if node.elements().next().is_none() {
        return Ok(node.text().into_owned());
    }
    let nested: Vec<String> = node
        .elements()
        .map(XmlElement::to_xml_string)
        .collect::<Result<_, _>>()?;
    Ok(nested.join(""))
}
