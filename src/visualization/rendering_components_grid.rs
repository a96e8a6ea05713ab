use crate::acquisition::FrameAcquisition;
use crate::config::ViewerConfig;
use crate::pipeline::Perception;
use crate::visualization::color_calculator;
use crate::visualization::coordinate_switch::camera_to_bevy;
use bevy::color::palettes::css::GOLD;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_flycam::prelude::*;
use std::time::Instant;

#[derive(Component)]
struct FpsText;

#[derive(Component)]
struct StatusText;

#[derive(Resource)]
struct Acquisition(FrameAcquisition);

#[derive(Resource)]
struct PerceptionState(Perception);

#[derive(Resource)]
struct ViewerSettings(ViewerConfig);

/// Last acquisition error shown in the overlay, `None` while frames flow
#[derive(Resource, Default)]
struct SignalStatus(Option<String>);

/// Open the viewer window and run until it is closed. Acquisition stops when
/// the app drops its resources.
pub fn run_bevy(acquisition: FrameAcquisition, perception: Perception, viewer: ViewerConfig) {
    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "skygrid".into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(FrameTimeDiagnosticsPlugin)
        .add_plugins(NoCameraPlayerPlugin)
        .insert_resource(MovementSettings {
            sensitivity: 0.00009,
            speed: 3.0,
        })
        .insert_resource(Acquisition(acquisition))
        .insert_resource(PerceptionState(perception))
        .insert_resource(ViewerSettings(viewer))
        .init_resource::<SignalStatus>()
        .add_systems(Startup, setup_bevy)
        .add_systems(
            Update,
            (
                perception_update_system,
                grid_shift_system,
                text_update_system,
                draw_gizmos,
            )
                .chain(),
        )
        .run();
}

fn setup_bevy(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // Behind and above the sensor, looking into the scene
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0., 1.5, 2.).looking_at(Vec3::new(0., 0., -2.), Vec3::Y),
        FlyCam,
    ));

    // Red sphere for the sensor at the origin
    let sphere_mesh = meshes.add(Sphere::new(0.05));
    let material = materials.add(StandardMaterial {
        emissive: Color::srgb_u8(255, 0, 0).into(),
        ..default()
    });
    commands.spawn((
        Mesh3d(sphere_mesh),
        MeshMaterial3d(material),
        Transform::from_translation(Vec3::ZERO),
    ));

    commands
        .spawn((
            Text::new("FPS: "),
            Node {
                position_type: PositionType::Absolute,
                bottom: Val::Px(12.0),
                left: Val::Px(12.0),
                ..default()
            },
        ))
        .with_child((TextSpan::default(), TextColor(GOLD.into()), FpsText));

    commands.spawn((
        Text::new("Waiting for sensor"),
        StatusText,
        Node {
            position_type: PositionType::Absolute,
            top: Val::Px(12.0),
            left: Val::Px(12.0),
            ..default()
        },
    ));
}

fn perception_update_system(
    acquisition: Res<Acquisition>,
    mut perception: ResMut<PerceptionState>,
    mut status: ResMut<SignalStatus>,
) {
    match perception.0.tick(&acquisition.0, Instant::now()) {
        Ok(_) => status.0 = None,
        Err(e) => status.0 = Some(e.to_string()),
    }
}

/// Arrow keys move the grid by one cell
fn grid_shift_system(keys: Res<ButtonInput<KeyCode>>, mut perception: ResMut<PerceptionState>) {
    let grid = perception.0.grid_mut();
    let extent = *grid.extent();
    let mut dx = 0.0;
    let mut dz = 0.0;
    if keys.just_pressed(KeyCode::ArrowLeft) {
        dx -= extent.cell_width();
    }
    if keys.just_pressed(KeyCode::ArrowRight) {
        dx += extent.cell_width();
    }
    if keys.just_pressed(KeyCode::ArrowUp) {
        dz += extent.cell_depth();
    }
    if keys.just_pressed(KeyCode::ArrowDown) {
        dz -= extent.cell_depth();
    }
    if dx == 0.0 && dz == 0.0 {
        return;
    }
    // A refused shift is logged by the grid and leaves it in place
    let _ = grid.shift_x(dx).and_then(|_| grid.shift_z(dz));
}

fn text_update_system(
    diagnostics: Res<DiagnosticsStore>,
    acquisition: Res<Acquisition>,
    perception: Res<PerceptionState>,
    status: Res<SignalStatus>,
    mut fps_query: Query<&mut TextSpan, With<FpsText>>,
    mut status_query: Query<&mut Text, With<StatusText>>,
) {
    let render_fps = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps| fps.smoothed())
        .unwrap_or(0.0);
    for mut span in &mut fps_query {
        **span = format!(
            "render {:.1} | depth {:.1} | color {:.1} | errors {}",
            render_fps,
            acquisition.0.depth_fps(),
            acquisition.0.color_fps(),
            acquisition.0.error_count()
        );
    }

    let grid = perception.0.grid();
    let line = match &status.0 {
        Some(error) => error.clone(),
        None => match grid.tallest_cell() {
            Some(cell) => format!(
                "Tallest: row {} col {} at {:.2} m ({} points)",
                cell.row, cell.col, cell.max_height, cell.count
            ),
            None => "No obstacles in grid".to_string(),
        },
    };
    for mut text in &mut status_query {
        **text = line.clone();
    }
}

fn draw_gizmos(
    mut gizmos: Gizmos,
    perception: Res<PerceptionState>,
    settings: Res<ViewerSettings>,
) {
    let grid = perception.0.grid();
    let ground = grid.floor().unwrap_or(0.0);

    for cell in grid.cells() {
        let corners = [
            camera_to_bevy(cell.x_min, ground, cell.z_min),
            camera_to_bevy(cell.x_max, ground, cell.z_min),
            camera_to_bevy(cell.x_max, ground, cell.z_max),
            camera_to_bevy(cell.x_min, ground, cell.z_max),
        ];
        gizmos.linestrip(
            corners.iter().copied().chain(std::iter::once(corners[0])),
            LinearRgba::gray(0.35),
        );

        if !cell.is_empty() {
            let (x, z) = cell.center();
            gizmos.line(
                camera_to_bevy(x, cell.min_height, z),
                camera_to_bevy(x, cell.max_height, z),
                color_calculator::height_to_color(cell.max_height),
            );
        }
    }

    if settings.0.draw_cloud {
        let skip = settings.0.point_skip.max(1);
        for point in perception.0.cloud().valid_points().step_by(skip) {
            let at = camera_to_bevy(point.x, point.y, point.z);
            gizmos.line(
                at,
                at + Vec3::Y * 0.01,
                color_calculator::point_color(point.color, point.y),
            );
        }
    }
}
