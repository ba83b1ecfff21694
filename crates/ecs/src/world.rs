use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_common::{EntityId, Transform};

use crate::components::{Atmosphere, Camera, Light, MeshComponent, Name, Spin};

/// Per-entity data stored in the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    pub transform: Transform,
}

/// The world state queried by renderers.
///
/// Uses BTreeMap so every query iterates in the same order for the same
/// contents. Mutations only happen from the logic side; renderers take a
/// snapshot through [`World::renderables`] and friends once per tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    entities: BTreeMap<EntityId, EntityData>,
    names: BTreeMap<EntityId, Name>,
    meshes: BTreeMap<EntityId, MeshComponent>,
    cameras: BTreeMap<EntityId, Camera>,
    lights: BTreeMap<EntityId, Light>,
    spins: BTreeMap<EntityId, Spin>,
    atmosphere: Atmosphere,
    active_camera: Option<EntityId>,
    tick: u64,
    time: f64,
}

/// A mesh instance as seen by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Renderable {
    pub entity: EntityId,
    pub transform: Transform,
    pub mesh: MeshComponent,
}

/// A light with its world-space placement resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub light: Light,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds since creation.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, EntityData> {
        &self.entities
    }

    pub fn spawn(&mut self, transform: Transform) -> EntityId {
        let id = EntityId::new();
        self.entities.insert(id, EntityData { transform });
        id
    }

    /// Remove an entity and every component attached to it.
    pub fn despawn(&mut self, id: EntityId) -> Option<EntityData> {
        self.names.remove(&id);
        self.meshes.remove(&id);
        self.cameras.remove(&id);
        self.lights.remove(&id);
        self.spins.remove(&id);
        if self.active_camera == Some(id) {
            self.active_camera = None;
        }
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(&id)
    }

    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> bool {
        match self.entities.get_mut(&id) {
            Some(data) => {
                data.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn set_name(&mut self, id: EntityId, name: impl Into<String>) {
        self.names.insert(id, Name(name.into()));
    }

    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.names.get(&id).map(|n| n.0.as_str())
    }

    pub fn set_mesh(&mut self, id: EntityId, mesh: MeshComponent) {
        self.meshes.insert(id, mesh);
    }

    pub fn remove_mesh(&mut self, id: EntityId) -> Option<MeshComponent> {
        self.meshes.remove(&id)
    }

    pub fn set_light(&mut self, id: EntityId, light: Light) {
        self.lights.insert(id, light);
    }

    pub fn set_spin(&mut self, id: EntityId, spin: Spin) {
        self.spins.insert(id, spin);
    }

    /// Attach a camera. The first camera added becomes active.
    pub fn set_camera(&mut self, id: EntityId, camera: Camera) {
        self.cameras.insert(id, camera);
        if self.active_camera.is_none() {
            self.active_camera = Some(id);
        }
    }

    pub fn set_active_camera(&mut self, id: EntityId) -> bool {
        if self.cameras.contains_key(&id) {
            self.active_camera = Some(id);
            true
        } else {
            false
        }
    }

    /// Active camera with its transform.
    pub fn active_camera(&self) -> Option<(Transform, Camera)> {
        let id = self.active_camera?;
        let camera = *self.cameras.get(&id)?;
        let transform = self.entities.get(&id)?.transform;
        Some((transform, camera))
    }

    pub fn atmosphere(&self) -> &Atmosphere {
        &self.atmosphere
    }

    pub fn set_atmosphere(&mut self, atmosphere: Atmosphere) {
        self.atmosphere = atmosphere;
    }

    /// Every entity with a mesh, in entity order.
    pub fn renderables(&self) -> Vec<Renderable> {
        self.meshes
            .iter()
            .filter_map(|(id, mesh)| {
                self.entities.get(id).map(|data| Renderable {
                    entity: *id,
                    transform: data.transform,
                    mesh: *mesh,
                })
            })
            .collect()
    }

    pub fn lights(&self) -> Vec<PlacedLight> {
        self.lights
            .iter()
            .filter_map(|(id, light)| {
                self.entities.get(id).map(|data| PlacedLight {
                    position: data.transform.position,
                    direction: data.transform.forward(),
                    light: *light,
                })
            })
            .collect()
    }

    /// Advance simulation time and apply spin components.
    pub fn step(&mut self, delta: f32) {
        self.tick += 1;
        self.time += delta as f64;
        for (id, spin) in &self.spins {
            if let Some(data) = self.entities.get_mut(id) {
                let axis = spin.axis.try_normalize().unwrap_or(Vec3::Y);
                let rotation = Quat::from_axis_angle(axis, spin.radians_per_second * delta);
                data.transform.rotation = (rotation * data.transform.rotation).normalize();
            }
        }
        tracing::trace!(tick = self.tick, "world stepped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::ResourceId;

    fn mesh(model: u64) -> MeshComponent {
        MeshComponent {
            model: ResourceId(model),
            mesh_index: 0,
            material: ResourceId(100),
        }
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.tick(), 0);
        assert_eq!(w.entity_count(), 0);
        assert!(w.active_camera().is_none());
    }

    #[test]
    fn renderables_require_mesh() {
        let mut w = World::new();
        let a = w.spawn(Transform::default());
        let _b = w.spawn(Transform::default());
        w.set_mesh(a, mesh(1));
        let r = w.renderables();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].entity, a);
    }

    #[test]
    fn despawn_clears_components() {
        let mut w = World::new();
        let id = w.spawn(Transform::default());
        w.set_mesh(id, mesh(1));
        w.set_camera(id, Camera::default());
        w.set_light(id, Light::default());
        w.despawn(id);
        assert!(w.renderables().is_empty());
        assert!(w.lights().is_empty());
        assert!(w.active_camera().is_none());
    }

    #[test]
    fn first_camera_becomes_active() {
        let mut w = World::new();
        let a = w.spawn(Transform::from_position(Vec3::Z));
        let b = w.spawn(Transform::default());
        w.set_camera(a, Camera::default());
        w.set_camera(b, Camera::default());
        assert_eq!(w.active_camera().unwrap().0.position, Vec3::Z);
        assert!(w.set_active_camera(b));
        assert_eq!(w.active_camera().unwrap().0.position, Vec3::ZERO);
    }

    #[test]
    fn step_applies_spin() {
        let mut w = World::new();
        let id = w.spawn(Transform::default());
        w.set_spin(
            id,
            Spin {
                axis: Vec3::Y,
                radians_per_second: std::f32::consts::PI,
            },
        );
        w.step(0.5);
        let forward = w.get(id).unwrap().transform.forward();
        assert!((forward - Vec3::NEG_X).length() < 1e-4);
        assert_eq!(w.tick(), 1);
        assert!((w.time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn renderable_order_is_stable() {
        let mut w = World::new();
        for i in 0..20 {
            let id = w.spawn(Transform::default());
            w.set_mesh(id, mesh(i));
        }
        let first: Vec<_> = w.renderables().iter().map(|r| r.entity).collect();
        let second: Vec<_> = w.renderables().iter().map(|r| r.entity).collect();
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, second);
        assert_eq!(first, sorted);
    }
}
