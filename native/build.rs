// Build script to embed the elevation manifest into the worker executable.

fn main() {
    // Only compile resources on Windows.
    #[cfg(target_os = "windows")]
    {
        // The worker must run elevated: embed a requireAdministrator manifest.
        let mut res = winres::WindowsResource::new();
        res.set_manifest_file("app.manifest");

        if let Err(e) = res.compile() {
            eprintln!("Warning: Failed to compile Windows resources: {}", e);
            eprintln!("The worker executable will not request elevation on launch.");
        }
    }

    // Rebuild if the manifest changes.
    println!("cargo:rerun-if-changed=app.manifest");
}
