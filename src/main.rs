use bevy::prelude::*;

mod geometry;
mod plugins;
mod scan;

fn main() {
    App::new()
        .insert_resource(ClearColor(Color::srgb(0.03, 0.04, 0.08)))
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Starlane".to_string(),
                resolution: (1280, 720).into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins((
            plugins::core::CorePlugin,
            plugins::server::ServerPlugin,
            plugins::snapshot::ScanPlugin,
            plugins::orders::OrdersPlugin,
            plugins::player::PlayerPlugin,
            plugins::render2d::Render2DPlugin,
            plugins::ui::UIPlugin,
        ))
        .run();
}
