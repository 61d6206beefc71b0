//! CLI subcommand: `tablecloth paths`
//!
//! Prints all resolved paths for debugging and scripting.

use anyhow::Result;

use tablecloth::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("TableCloth Paths");
    println!("================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  settings:       {}", paths.settings_file().display());
    println!("  profile:        {}", paths.sandbox_profile().display());
    println!("  logon script:   {}", paths.bootstrap_script().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available)"),
    }
    println!("  instance lock:  {}", paths.instance_lock().display());

    Ok(())
}
