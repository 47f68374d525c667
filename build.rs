#[cfg(feature = "gpu")]
use spirv_builder::{MetadataPrintout, SpirvBuilder};

#[cfg(feature = "gpu")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    SpirvBuilder::new("shader", "spirv-unknown-spv1.5")
        .print_metadata(MetadataPrintout::Full)
        .relax_struct_store(true)
        .relax_logical_pointer(true)
        .build()?;
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
}
