//! Sample host activating a small engine module set.
//!
//! Validates and starts the default modules, hot swaps the lighting module a
//! couple of times, shows the gate refusing a restart-required module and
//! prints the module records before shutting down.
//!
//! Run with: cargo run --example module_host

use module_host_runtime::{
    module_entry_points, DescriptorBuilder, HostConfig, Module, ModuleHost, ModuleUnit,
    RegistryConfig, Version, MODULE_API_VERSION,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Default)]
struct MeshRenderer {
    meshes: u32,
}

impl Module for MeshRenderer {
    fn on_load(&mut self) -> module_host_runtime::Result<()> {
        self.meshes = 1;
        Ok(())
    }

    fn on_start(&mut self) -> module_host_runtime::Result<()> {
        info!("mesh renderer drawing {} mesh", self.meshes);
        Ok(())
    }
}

#[derive(Default)]
struct BasicLighting;

impl Module for BasicLighting {
    fn on_start(&mut self) -> module_host_runtime::Result<()> {
        info!("basic lighting online");
        Ok(())
    }

    fn on_stop(&mut self) -> module_host_runtime::Result<()> {
        info!("basic lighting offline");
        Ok(())
    }
}

#[derive(Default)]
struct HotReload;

impl Module for HotReload {}

#[derive(Default)]
struct PlatformWindow;

impl Module for PlatformWindow {}

fn default_modules(api: Version) -> Vec<ModuleUnit> {
    vec![
        ModuleUnit::new(
            DescriptorBuilder::new("engine.render.mesh", api)
                .category("render")
                .module_version(Version::new(1, 0, 0))
                .swappable()
                .build_unchecked(),
            module_entry_points!(MeshRenderer),
        ),
        ModuleUnit::new(
            DescriptorBuilder::new("engine.lighting.basic", api)
                .category("render")
                .module_version(Version::new(1, 0, 0))
                .swappable()
                .dependency("engine.render.mesh")
                .build_unchecked(),
            module_entry_points!(BasicLighting),
        ),
        ModuleUnit::new(
            DescriptorBuilder::new("engine.modules.hot_reload", api)
                .category("runtime")
                .module_version(Version::new(0, 1, 0))
                .swappable()
                .build_unchecked(),
            module_entry_points!(HotReload),
        ),
        ModuleUnit::new(
            DescriptorBuilder::new("engine.platform.window", api)
                .category("platform")
                .module_version(Version::new(1, 0, 0))
                .build_unchecked(),
            module_entry_points!(PlatformWindow),
        ),
    ]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let host = ModuleHost::new(
        HostConfig::new()
            .with_registry(RegistryConfig::new().with_max_modules(16))
            .with_supported_api_version(MODULE_API_VERSION),
    );

    host.on_event(|event| info!("[{}] {}", event.module_id(), event.event_name()));

    let modules = default_modules(MODULE_API_VERSION);
    let validation = host.validate(&modules);
    if !validation.ok {
        for error in &validation.errors {
            warn!("{}", error);
        }
        return Err("module validation failed".into());
    }

    let started = host.activate(modules)?;
    info!("Startup order: {}", started.join(" -> "));

    for _ in 0..2 {
        let lighting = default_modules(MODULE_API_VERSION)
            .into_iter()
            .find(|unit| unit.id() == "engine.lighting.basic")
            .ok_or("lighting module missing")?;
        let generation = host.hot_swap(lighting)?;
        info!("Lighting now at generation {}", generation);
    }

    let window = default_modules(MODULE_API_VERSION)
        .into_iter()
        .find(|unit| unit.id() == "engine.platform.window")
        .ok_or("window module missing")?;
    if let Err(e) = host.hot_swap(window) {
        warn!("{}", e);
    }

    host.set_enabled("engine.modules.hot_reload", false)?;

    println!("\n{:<28} {:<10} {:<9} {:<8} {:<4} {}", "MODULE", "CATEGORY", "VERSION", "STATE", "GEN", "FLAGS");
    for record in host.records() {
        let mut flags = Vec::new();
        if record.hot_reload_supported {
            flags.push("swappable");
        }
        if !record.enabled {
            flags.push("disabled");
        }
        println!(
            "{:<28} {:<10} {:<9} {:<8} {:<4} {}",
            record.id,
            record.category,
            record.module_version.to_string(),
            record.state.to_string(),
            record.generation,
            flags.join(",")
        );
    }

    let stats = host.stats();
    println!(
        "\n{} modules, {} started, {} swappable, {} hot swaps\n",
        stats.total, stats.started, stats.swappable, stats.hot_swaps
    );

    host.shutdown();
    Ok(())
}
