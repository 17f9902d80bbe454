//! Axis-aligned box physics used by the authoritative simulation.
//!
//! The simulation only talks to the [`PhysicsBackend`] trait. [`ArcadePhysics`]
//! is the default implementation: gravity, world bounds, pairwise box
//! separation along the axis of least penetration, and per-body contact
//! flags that the game reads on the following tick.

use std::time::Duration;

/// Contacts closer than this are treated as touching.
const TOUCH_TOLERANCE: f32 = 0.1;
/// Overlaps smaller than this are ignored by the solver.
const OVERLAP_EPSILON: f32 = 1e-4;
/// Largest distance any body may travel in one substep. A quarter of the
/// thinnest platform keeps falling bodies from tunnelling.
const MAX_SUBSTEP_DISTANCE: f32 = 4.0;
const MAX_SUBSTEPS: u32 = 64;
/// Solver passes per substep grow with the collider count between these.
const SOLVER_ITERATIONS: usize = 4;
const MAX_SOLVER_ITERATIONS: usize = 32;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down.
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns true when both components are exactly zero.
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// Opaque reference to a body owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(usize);

impl BodyHandle {
    /// Backends hand out handles as indices into their own body storage.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which sides of a body are in resting contact with an obstacle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Blocked {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl Blocked {
    fn merge(&mut self, other: Blocked) {
        self.left |= other.left;
        self.right |= other.right;
        self.up |= other.up;
        self.down |= other.down;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyProperties {
    /// Clamp the body to the world rectangle.
    pub collide_world_bounds: bool,
    /// Whether contact with another body may displace this one.
    pub pushable: bool,
    /// Never moves, neither by velocity nor by contact.
    pub immovable: bool,
    pub allow_gravity: bool,
}

impl BodyProperties {
    /// Level geometry.
    pub const STATIC: BodyProperties = BodyProperties {
        collide_world_bounds: false,
        pushable: false,
        immovable: true,
        allow_gravity: false,
    };

    /// A character that walks, jumps and falls but is never shoved around.
    pub const CHARACTER: BodyProperties = BodyProperties {
        collide_world_bounds: true,
        pushable: false,
        immovable: false,
        allow_gravity: true,
    };
}

impl Default for BodyProperties {
    fn default() -> Self {
        BodyProperties {
            collide_world_bounds: false,
            pushable: true,
            immovable: false,
            allow_gravity: true,
        }
    }
}

/// The capabilities the simulation needs from a 2D AABB physics engine.
pub trait PhysicsBackend {
    /// Creates a body with its top-left corner at `(x, y)`.
    fn create_body(&mut self, x: f32, y: f32, width: f32, height: f32) -> BodyHandle;
    fn set_body_properties(&mut self, body: BodyHandle, properties: BodyProperties);
    /// Makes two bodies solid to each other.
    fn add_collider(&mut self, a: BodyHandle, b: BodyHandle);
    /// Integrates the world forward and recomputes contact flags.
    fn advance(&mut self, delta: Duration);
    fn blocked(&self, body: BodyHandle) -> Blocked;
    fn position(&self, body: BodyHandle) -> Vector2;
    fn velocity(&self, body: BodyHandle) -> Vector2;
    fn set_velocity_x(&mut self, body: BodyHandle, velocity: f32);
    fn set_velocity_y(&mut self, body: BodyHandle, velocity: f32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Axis-aligned box with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    fn min(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.left(),
            Axis::Y => self.top(),
        }
    }

    fn max(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.right(),
            Axis::Y => self.bottom(),
        }
    }

    fn center(&self, axis: Axis) -> f32 {
        (self.min(axis) + self.max(axis)) / 2.0
    }

    /// Extent of the intersection along each axis, or `None` when the boxes
    /// are disjoint or merely touching.
    pub fn overlap(&self, other: &Aabb) -> Option<(f32, f32)> {
        let overlap_x = self.right().min(other.right()) - self.left().max(other.left());
        let overlap_y = self.bottom().min(other.bottom()) - self.top().max(other.top());

        if overlap_x > OVERLAP_EPSILON && overlap_y > OVERLAP_EPSILON {
            Some((overlap_x, overlap_y))
        } else {
            None
        }
    }

    /// Sides of `self` that sit flush against `other`.
    fn touching(&self, other: &Aabb) -> Blocked {
        let overlap_x = self.right().min(other.right()) - self.left().max(other.left());
        let overlap_y = self.bottom().min(other.bottom()) - self.top().max(other.top());

        Blocked {
            left: overlap_y > TOUCH_TOLERANCE
                && (self.left() - other.right()).abs() < TOUCH_TOLERANCE,
            right: overlap_y > TOUCH_TOLERANCE
                && (self.right() - other.left()).abs() < TOUCH_TOLERANCE,
            up: overlap_x > TOUCH_TOLERANCE
                && (self.top() - other.bottom()).abs() < TOUCH_TOLERANCE,
            down: overlap_x > TOUCH_TOLERANCE
                && (self.bottom() - other.top()).abs() < TOUCH_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone)]
struct Body {
    bounds: Aabb,
    /// Bounds at the start of the current substep.
    previous: Aabb,
    velocity: Vector2,
    properties: BodyProperties,
    blocked: Blocked,
}

impl Body {
    fn is_movable(&self) -> bool {
        !self.properties.immovable
    }

    fn velocity_along(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.velocity.x,
            Axis::Y => self.velocity.y,
        }
    }

    fn stop_along(&mut self, axis: Axis) {
        match axis {
            Axis::X => self.velocity.x = 0.0,
            Axis::Y => self.velocity.y = 0.0,
        }
    }

    /// Distance travelled along `axis` during the current substep.
    fn displacement(&self, axis: Axis) -> f32 {
        self.bounds.min(axis) - self.previous.min(axis)
    }

    /// Moves the body along an axis, respecting world bounds.
    /// Returns the distance actually moved.
    fn shift(&mut self, axis: Axis, amount: f32, world: &Aabb) -> f32 {
        if !self.is_movable() || amount == 0.0 {
            return 0.0;
        }

        let start = self.bounds.min(axis);
        match axis {
            Axis::X => self.bounds.x += amount,
            Axis::Y => self.bounds.y += amount,
        }
        if self.properties.collide_world_bounds {
            self.clamp_to(world);
        }
        (self.bounds.min(axis) - start).abs()
    }

    fn clamp_to(&mut self, world: &Aabb) {
        if self.bounds.left() < world.left() {
            self.bounds.x = world.left();
            self.velocity.x = self.velocity.x.max(0.0);
        } else if self.bounds.right() > world.right() {
            self.bounds.x = world.right() - self.bounds.width;
            self.velocity.x = self.velocity.x.min(0.0);
        }

        if self.bounds.top() < world.top() {
            self.bounds.y = world.top();
            self.velocity.y = self.velocity.y.max(0.0);
        } else if self.bounds.bottom() > world.bottom() {
            self.bounds.y = world.bottom() - self.bounds.height;
            self.velocity.y = self.velocity.y.min(0.0);
        }
    }

    fn world_contacts(&self, world: &Aabb) -> Blocked {
        if !self.properties.collide_world_bounds {
            return Blocked::default();
        }

        Blocked {
            left: self.bounds.left() <= world.left() + TOUCH_TOLERANCE,
            right: self.bounds.right() >= world.right() - TOUCH_TOLERANCE,
            up: self.bounds.top() <= world.top() + TOUCH_TOLERANCE,
            down: self.bounds.bottom() >= world.bottom() - TOUCH_TOLERANCE,
        }
    }
}

/// Arcade-style AABB world with gravity along +y.
#[derive(Debug, Clone)]
pub struct ArcadePhysics {
    world: Aabb,
    gravity: f32,
    bodies: Vec<Body>,
    colliders: Vec<(BodyHandle, BodyHandle)>,
}

impl ArcadePhysics {
    pub fn new(width: f32, height: f32, gravity: f32) -> Self {
        Self {
            world: Aabb::new(0.0, 0.0, width, height),
            gravity,
            bodies: Vec::new(),
            colliders: Vec::new(),
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn bounds(&self, body: BodyHandle) -> Aabb {
        self.bodies[body.0].bounds
    }

    pub fn properties(&self, body: BodyHandle) -> BodyProperties {
        self.bodies[body.0].properties
    }

    fn required_substeps(&self, dt: f32) -> u32 {
        let max_speed = self
            .bodies
            .iter()
            .filter(|body| body.is_movable())
            .map(|body| body.velocity.magnitude())
            .fold(0.0_f32, f32::max);

        let max_movement_this_step = max_speed * dt;
        if max_movement_this_step > MAX_SUBSTEP_DISTANCE {
            ((max_movement_this_step / MAX_SUBSTEP_DISTANCE).ceil() as u32).min(MAX_SUBSTEPS)
        } else {
            1
        }
    }

    fn integrate(&mut self, dt: f32) {
        let world = self.world;
        for body in self.bodies.iter_mut().filter(|body| body.is_movable()) {
            body.previous = body.bounds;
            body.bounds.x += body.velocity.x * dt;
            body.bounds.y += body.velocity.y * dt;

            if body.properties.collide_world_bounds {
                body.clamp_to(&world);
            }
        }
    }

    /// A push along a chain of touching bodies travels one pair per pass,
    /// so crowded worlds get more passes.
    fn solver_passes(&self) -> usize {
        self.colliders
            .len()
            .clamp(SOLVER_ITERATIONS, MAX_SOLVER_ITERATIONS)
    }

    fn resolve_colliders(&mut self) {
        for _ in 0..self.solver_passes() {
            let mut resolved_any = false;
            for index in 0..self.colliders.len() {
                let (a, b) = self.colliders[index];
                resolved_any |= self.separate(a, b);
            }
            if !resolved_any {
                break;
            }
        }
    }

    /// Pushes two overlapping bodies apart. Returns true if they overlapped.
    fn separate(&mut self, a: BodyHandle, b: BodyHandle) -> bool {
        if a == b {
            return false;
        }

        let world = self.world;
        let (body_a, body_b) = pair_mut(&mut self.bodies, a.0, b.0);
        if !body_a.is_movable() && !body_b.is_movable() {
            return false;
        }

        if body_a.bounds.overlap(&body_b.bounds).is_none() {
            return false;
        }

        // Shallowest penetration decides the axis
        let penetration_x = penetration(&body_a.bounds, &body_b.bounds, Axis::X);
        let penetration_y = penetration(&body_a.bounds, &body_b.bounds, Axis::Y);
        if penetration_x < penetration_y {
            separate_along(body_a, body_b, Axis::X, &world);
        } else {
            separate_along(body_a, body_b, Axis::Y, &world);
        }
        true
    }

    fn update_contacts(&mut self) {
        for index in 0..self.bodies.len() {
            let body = &self.bodies[index];
            if !body.is_movable() {
                continue;
            }

            let mut blocked = body.world_contacts(&self.world);
            for &(a, b) in &self.colliders {
                let other = if a.0 == index {
                    b.0
                } else if b.0 == index {
                    a.0
                } else {
                    continue;
                };
                if other != index {
                    blocked.merge(body.bounds.touching(&self.bodies[other].bounds));
                }
            }

            self.bodies[index].blocked = blocked;
        }
    }
}

impl PhysicsBackend for ArcadePhysics {
    fn create_body(&mut self, x: f32, y: f32, width: f32, height: f32) -> BodyHandle {
        let bounds = Aabb::new(x, y, width, height);
        self.bodies.push(Body {
            bounds,
            previous: bounds,
            velocity: Vector2::default(),
            properties: BodyProperties::default(),
            blocked: Blocked::default(),
        });
        BodyHandle::new(self.bodies.len() - 1)
    }

    fn set_body_properties(&mut self, body: BodyHandle, properties: BodyProperties) {
        let body = &mut self.bodies[body.0];
        body.properties = properties;
        if properties.immovable {
            body.velocity = Vector2::default();
        }
    }

    fn add_collider(&mut self, a: BodyHandle, b: BodyHandle) {
        self.colliders.push((a, b));
    }

    fn advance(&mut self, delta: Duration) {
        let dt = delta.as_secs_f32();
        if dt <= 0.0 {
            return;
        }

        // Bodies resting on something do not accumulate gravity
        let gravity = self.gravity;
        for body in self.bodies.iter_mut().filter(|body| body.is_movable()) {
            if body.properties.allow_gravity && !body.blocked.down {
                body.velocity.y += gravity * dt;
            }
        }

        let substeps = self.required_substeps(dt);
        let substep_dt = dt / substeps as f32;
        for _ in 0..substeps {
            self.integrate(substep_dt);
            self.resolve_colliders();
        }

        self.update_contacts();
    }

    fn blocked(&self, body: BodyHandle) -> Blocked {
        self.bodies[body.0].blocked
    }

    fn position(&self, body: BodyHandle) -> Vector2 {
        let bounds = self.bodies[body.0].bounds;
        Vector2::new(bounds.x, bounds.y)
    }

    fn velocity(&self, body: BodyHandle) -> Vector2 {
        self.bodies[body.0].velocity
    }

    fn set_velocity_x(&mut self, body: BodyHandle, velocity: f32) {
        let body = &mut self.bodies[body.0];
        if body.is_movable() {
            body.velocity.x = velocity;
        }
    }

    fn set_velocity_y(&mut self, body: BodyHandle, velocity: f32) {
        let body = &mut self.bodies[body.0];
        if body.is_movable() {
            body.velocity.y = velocity;
        }
    }
}

fn pair_mut(bodies: &mut [Body], a: usize, b: usize) -> (&mut Body, &mut Body) {
    if a < b {
        let (head, tail) = bodies.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = bodies.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

/// True when `a` sits on the low-coordinate side of `b` along `axis`.
fn is_before(a: &Body, b: &Body, axis: Axis) -> bool {
    if a.previous.max(axis) <= b.previous.min(axis) + OVERLAP_EPSILON {
        true
    } else if b.previous.max(axis) <= a.previous.min(axis) + OVERLAP_EPSILON {
        false
    } else {
        a.bounds.center(axis) <= b.bounds.center(axis)
    }
}

/// Shortest push along `axis` that would clear the overlap.
fn penetration(a: &Aabb, b: &Aabb, axis: Axis) -> f32 {
    (a.max(axis) - b.min(axis)).min(b.max(axis) - a.min(axis))
}

fn separate_along(a: &mut Body, b: &mut Body, axis: Axis, world: &Aabb) {
    let a_before = is_before(a, b, axis);
    // Direction that moves `a` away from `b`
    let away = if a_before { -1.0 } else { 1.0 };
    let distance = if a_before {
        a.bounds.max(axis) - b.bounds.min(axis)
    } else {
        b.bounds.max(axis) - a.bounds.min(axis)
    };

    let (share_a, share_b) = if !a.is_movable() {
        (0.0, 1.0)
    } else if !b.is_movable() {
        (1.0, 0.0)
    } else if a.properties.pushable && !b.properties.pushable {
        (1.0, 0.0)
    } else if b.properties.pushable && !a.properties.pushable {
        (0.0, 1.0)
    } else {
        // The body that moved into the contact is the one pushed back
        let approach_a = (a.displacement(axis) * -away).max(0.0);
        let approach_b = (b.displacement(axis) * away).max(0.0);
        let total = approach_a + approach_b;
        if total > 0.0 {
            (approach_a / total, approach_b / total)
        } else {
            (0.5, 0.5)
        }
    };

    let moved_a = a.shift(axis, away * distance * share_a, world);
    let remaining = distance - moved_a;
    let moved_b = b.shift(axis, -away * remaining, world);
    let leftover = remaining - moved_b;
    // Whatever the partner could not absorb goes back to `a`
    let moved_back = if leftover > OVERLAP_EPSILON {
        a.shift(axis, away * leftover, world)
    } else {
        0.0
    };

    let a_held = share_a > 0.0 || moved_back > 0.0 || leftover - moved_back > OVERLAP_EPSILON;
    let b_held = share_b > 0.0 || moved_b > 0.0;
    if a_held && a.velocity_along(axis) * -away > 0.0 {
        a.stop_along(axis);
    }
    if b_held && b.velocity_along(axis) * away > 0.0 {
        b.stop_along(axis);
    }
}
