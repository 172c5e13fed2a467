//! Textual map-processing commands.
//!
//! The server core treats commands as opaque strings executed against a map
//! key; all side effects happen inside the map store. `CommandRunner` is the
//! seam tests inject fakes through. `MapConsole` is the default runner: a
//! registry of named commands operating on one map under its write lock.

use std::collections::HashMap;

use crate::map::{MapStore, ViMap};

/// Executes one textual command against a stored map.
pub trait CommandRunner: Send + Sync {
    /// Run `command` against the map stored under `map_key`.
    fn run(&self, store: &MapStore, map_key: &str, command: &str) -> Result<(), String>;
}

type CommandFn = fn(&mut ViMap, &[&str]) -> Result<(), String>;

/// Default command runner with a registry of named commands.
pub struct MapConsole {
    commands: HashMap<String, CommandFn>,
}

impl Default for MapConsole {
    fn default() -> Self {
        Self::with_builtin_commands()
    }
}

impl MapConsole {
    /// An empty console with no registered commands.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// A console with the built-in map-processing commands registered.
    pub fn with_builtin_commands() -> Self {
        let mut console = Self::new();
        console.register("update_global_poses", update_global_poses);
        console.register("relax_vertex_poses", relax_vertex_poses);
        console.register("prune_empty_missions", prune_empty_missions);
        console
    }

    /// Register a command under `name`. Later registrations win.
    pub fn register(&mut self, name: &str, command: CommandFn) {
        self.commands.insert(name.to_string(), command);
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}

impl CommandRunner for MapConsole {
    fn run(&self, store: &MapStore, map_key: &str, command: &str) -> Result<(), String> {
        let mut tokens = command.split_whitespace();
        let name = tokens.next().ok_or_else(|| "empty command".to_string())?;
        let args: Vec<&str> = tokens.collect();

        let handler = self
            .commands
            .get(name)
            .ok_or_else(|| format!("unknown command '{}'", name))?;

        let handle = store
            .get(map_key)
            .ok_or_else(|| format!("no map with key '{}'", map_key))?;
        let mut map = handle.write().unwrap_or_else(|p| p.into_inner());
        handler(&mut map, &args)
    }
}

/// Recompute every vertex's global pose from its mission anchor:
/// `T_G_B = T_G_M * T_M_B`.
fn update_global_poses(map: &mut ViMap, _args: &[&str]) -> Result<(), String> {
    for mission in map.missions_mut() {
        for vertex in mission.vertices_mut() {
            vertex.t_g_b = vertex.t_g_m * vertex.t_m_b;
        }
    }
    Ok(())
}

/// Smooth global translations along each trajectory.
///
/// A cheap stand-in for a real pose-graph relaxation: each interior vertex
/// moves halfway toward the midpoint of its neighbors, repeated
/// `args[0]` times (default 1).
fn relax_vertex_poses(map: &mut ViMap, args: &[&str]) -> Result<(), String> {
    let iterations: usize = match args.first() {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("invalid iteration count '{}'", raw))?,
        None => 1,
    };

    for _ in 0..iterations {
        for mission in map.missions_mut() {
            let vertices = mission.vertices_mut();
            if vertices.len() < 3 {
                continue;
            }
            let translations: Vec<_> =
                vertices.iter().map(|v| v.t_g_b.translation.vector).collect();
            for i in 1..vertices.len() - 1 {
                let midpoint = (translations[i - 1] + translations[i + 1]) * 0.5;
                let smoothed = translations[i] * 0.5 + midpoint * 0.5;
                vertices[i].t_g_b.translation.vector = smoothed;
            }
        }
    }
    Ok(())
}

/// Drop missions that carry no vertices.
fn prune_empty_missions(map: &mut ViMap, _args: &[&str]) -> Result<(), String> {
    let empty: Vec<_> = map
        .missions()
        .filter(|m| m.num_vertices() == 0)
        .map(|m| m.id.clone())
        .collect();
    for id in empty {
        map.remove_mission(&id);
    }
    Ok(())
}
