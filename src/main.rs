use skygrid::config::DeviceKind;
use skygrid::device::{Device, SyntheticDevice, UdpDevice};
use skygrid::{
    visualization, Calibration, Config, FrameAcquisition, Perception, Result, SpatialGrid,
};
use std::env;

/// Config path from `skygrid <path>` or `skygrid --config <path>`
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    args.get(1).filter(|arg| !arg.starts_with('-')).cloned()
}

fn create_device(config: &Config) -> Result<Box<dyn Device>> {
    match config.device.kind {
        DeviceKind::Synthetic => Ok(Box::new(SyntheticDevice::new(
            config.device.synthetic.clone(),
        ))),
        DeviceKind::Udp => Ok(Box::new(UdpDevice::new(config.device.bind_address()?))),
    }
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("skygrid v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("No config given, using defaults"),
    }
    log::info!("Device: {:?}", config.device.kind);

    let device = create_device(&config)?;
    let acquisition = FrameAcquisition::start(device, &config.acquisition)?;

    let calibration =
        Calibration::from_config(&config.calibration, config.acquisition.depth_encoding);
    let grid = SpatialGrid::from_config(&config.grid)?;
    let perception = Perception::new(calibration, grid);

    visualization::run_bevy(acquisition, perception, config.viewer.clone());

    log::info!("skygrid stopped");
    Ok(())
}
