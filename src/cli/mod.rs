use crate::avbtool::{AvbTool, FooterOptions};
use crate::config::Config;
use crate::dm::{build_verity_target, kernel_cmdline};
use crate::partuuid::UuidResolver;
use crate::sizing::PartitionSizeSolver;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version, about, author)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to /etc/vroot.toml if present)
    #[clap(long, global = true, env = "VROOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the kernel command line that mounts a verified root from an image
    #[clap(name = "cmdline", aliases = &["c"])]
    Cmdline {
        /// Image carrying a hashtree footer
        #[clap(value_parser)]
        image: PathBuf,

        /// Partition UUID to reference instead of the one read from the image
        #[clap(long)]
        partuuid: Option<String>,
    },

    /// Print the parsed hashtree descriptor of an image
    #[clap(name = "descriptor", aliases = &["desc", "d"])]
    Descriptor {
        #[clap(value_parser)]
        image: PathBuf,
    },

    /// Compute the smallest partition that fits an image with its hashtree footer
    #[clap(name = "size", aliases = &["s"])]
    Size {
        #[clap(value_parser)]
        image: PathBuf,

        /// Write the hashtree footer using the computed partition size
        #[clap(long)]
        apply: bool,

        /// Partition name recorded in the footer
        #[clap(long)]
        partition_name: Option<String>,

        /// Hash algorithm for the hash tree
        #[clap(long)]
        hash_algorithm: Option<String>,
    },
}

impl Cli {
    pub fn run(self) -> Result<(), String> {
        let config = Config::load(self.config.as_deref()).map_err(|e| e.to_string())?;
        let avbtool = AvbTool::new(&config.tools.avbtool);
        tracing::trace!("Running command: {:?}", self.command);
        match self.command {
            Commands::Cmdline { image, partuuid } => {
                let storage_id = match partuuid {
                    Some(id) => id,
                    None => UuidResolver::new(&config.tools.file)
                        .resolve(&image)
                        .map_err(|e| format!("Failed to resolve partition UUID: {e}"))?,
                };
                let descriptor = avbtool
                    .hashtree_descriptor(&image)
                    .map_err(|e| format!("Failed to read descriptor of {}: {e}", image.display()))?;
                let target = build_verity_target(&descriptor, &storage_id)
                    .map_err(|e| format!("Failed to build dm-verity table: {e}"))?;

                println!("{}", kernel_cmdline(&target, &config.cmdline.root_param));
                Ok(())
            }
            Commands::Descriptor { image } => {
                let descriptor = avbtool
                    .hashtree_descriptor(&image)
                    .map_err(|e| format!("Failed to read descriptor of {}: {e}", image.display()))?;
                let rendered = toml::to_string_pretty(&descriptor)
                    .map_err(|e| format!("Failed to render descriptor: {e}"))?;
                print!("{rendered}");
                Ok(())
            }
            Commands::Size {
                image,
                apply,
                partition_name,
                hash_algorithm,
            } => {
                let image_size = std::fs::metadata(&image)
                    .map_err(|e| format!("Failed to stat {}: {e}", image.display()))?
                    .len();
                tracing::info!("Current image size: {} bytes", image_size);

                let mut oracle = avbtool.clone();
                let result = PartitionSizeSolver::new(config.sizing.max_growth_factor)
                    .solve(image_size, &mut oracle)
                    .map_err(|e| format!("Could not determine the minimum partition size: {e}"))?;
                println!("{}", result.minimal_partition_size);

                if apply {
                    let options = FooterOptions {
                        partition_size: result.minimal_partition_size,
                        partition_name: partition_name.unwrap_or(config.footer.partition_name),
                        hash_algorithm: hash_algorithm.unwrap_or(config.footer.hash_algorithm),
                    };
                    avbtool
                        .add_hashtree_footer(&image, &options)
                        .map_err(|e| format!("Failed to add hashtree footer: {e}"))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_command() {
        let cli = Cli::parse_from(["vroot", "size", "root.img", "--apply", "--partition-name", "system"]);
        let Commands::Size {
            image,
            apply,
            partition_name,
            hash_algorithm,
        } = cli.command
        else {
            panic!("expected size command");
        };
        assert_eq!(image, PathBuf::from("root.img"));
        assert!(apply);
        assert_eq!(partition_name.as_deref(), Some("system"));
        assert_eq!(hash_algorithm, None);
    }

    #[test]
    fn test_parse_cmdline_alias() {
        let cli = Cli::parse_from(["vroot", "--config", "/tmp/v.toml", "c", "root.img", "--partuuid", "1111-2222"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/v.toml")));
        assert!(matches!(
            cli.command,
            Commands::Cmdline { ref partuuid, .. } if partuuid.as_deref() == Some("1111-2222")
        ));
    }
}
