fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "cuda")]
    build_kernels();
}

#[cfg(feature = "cuda")]
fn build_kernels() {
    use cuda_builder::CudaBuilder;
    use std::path::PathBuf;

    println!("cargo:rerun-if-changed=gpu/src");
    let Some(out_dir) = std::env::var_os("OUT_DIR").map(PathBuf::from) else {
        panic!("OUT_DIR is not set");
    };
    let result = CudaBuilder::new("gpu")
        .copy_to(out_dir.join("kernels.ptx"))
        .release(true)
        .build();
    if let Err(error) = result {
        panic!("failed to build CUDA kernels: {}", error);
    }
}
