use std::process::ExitCode;

use clap::Parser;

use blinky::{
    Args, DeviceManager, ProfileDescriptor, RunOptions, SystemTerminalClient, fake_transport,
    real_transport, run_with_options,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(error) = args.validate() {
        error.exit();
    }
    let mut stdout = std::io::stdout();

    let run_result = async {
        let options = RunOptions::builder()
            .maybe_log_level(args.log_level())
            .maybe_output_format(args.output_format())
            .build();
        let profile = ProfileDescriptor::resolve(args.profile_path())?;
        let device = args.device();
        let btleplug_config = args.btleplug_config();
        let (command, maybe_fake_args) = args.into_command_and_fake_args();
        let transport = match maybe_fake_args {
            Some(fake_args) => fake_transport(fake_args, profile.clone()).await?,
            None => real_transport(btleplug_config).await?,
        };
        let manager = DeviceManager::new(transport, profile);

        run_with_options(
            command,
            &mut stdout,
            &SystemTerminalClient,
            &manager,
            device,
            options,
        )
        .await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
