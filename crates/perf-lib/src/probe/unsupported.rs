//! Probes for platforms without a sampling backend
//!
//! They report their resource types like the real probes but refuse to
//! initialize, which puts the owning monitor into `Error`.

use super::ResourceProbe;
use crate::models::{ResourceType, ResourceUsage};
use anyhow::Result;
use async_trait::async_trait;

macro_rules! unsupported_probe {
    ($name:ident, $label:literal, $types:expr) => {
        #[derive(Debug, Default)]
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }

        #[async_trait]
        impl ResourceProbe for $name {
            fn name(&self) -> &str {
                $label
            }

            fn supported_types(&self) -> &[ResourceType] {
                $types
            }

            async fn initialize(&self) -> Result<()> {
                anyhow::bail!(
                    "{} sampling is not supported on {}",
                    $label,
                    std::env::consts::OS
                )
            }

            async fn sample(&self) -> Result<ResourceUsage> {
                anyhow::bail!("{} probe was never initialized", $label)
            }
        }
    };
}

unsupported_probe!(CpuProbe, "cpu", &[ResourceType::Cpu, ResourceType::Process]);
unsupported_probe!(MemoryProbe, "memory", &[ResourceType::Memory, ResourceType::Process]);
unsupported_probe!(NetworkProbe, "network", &[ResourceType::Network]);
