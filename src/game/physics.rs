//! Disc physics for the strike board
//!
//! Fixed-step simulation of one striker and N discs on a square board
//! spanning `-BOARD_LIMIT..=BOARD_LIMIT` on both axes.

/// Fixed simulation step in seconds
pub const STEP: f32 = 1.0 / 60.0;
pub const BOARD_LIMIT: f32 = 1.0;
/// Velocity multiplier per step
pub const FRICTION: f32 = 0.985;
/// Velocity components below this snap to zero
pub const REST_SPEED: f32 = 0.0005;
pub const WALL_RESTITUTION: f32 = 0.95;
pub const DISC_RESTITUTION: f32 = 0.9;
pub const STRIKER_RADIUS: f32 = 0.05;
pub const DISC_RADIUS: f32 = 0.045;
/// Striker speed at full power
pub const STRIKE_SPEED: f32 = 2.3;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("strike angle must be finite")]
    InvalidAngle,
    #[error("strike power must be a finite value in 0..=1")]
    InvalidPower,
}

/// A circular body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub radius: f32,
}

impl Body {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            radius,
        }
    }

    pub fn striker(x: f32, y: f32) -> Self {
        Self::new(x, y, STRIKER_RADIUS)
    }

    pub fn disc(x: f32, y: f32) -> Self {
        Self::new(x, y, DISC_RADIUS)
    }

    pub fn is_at_rest(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0
    }

    fn integrate(&mut self, dt: f32) {
        self.x += self.vx * dt;
        self.y += self.vy * dt;

        self.vx *= FRICTION;
        self.vy *= FRICTION;
        if self.vx.abs() < REST_SPEED {
            self.vx = 0.0;
        }
        if self.vy.abs() < REST_SPEED {
            self.vy = 0.0;
        }

        if self.x.abs() > BOARD_LIMIT {
            self.vx *= -WALL_RESTITUTION;
            self.x = self.x.clamp(-BOARD_LIMIT, BOARD_LIMIT);
        }
        if self.y.abs() > BOARD_LIMIT {
            self.vy *= -WALL_RESTITUTION;
            self.y = self.y.clamp(-BOARD_LIMIT, BOARD_LIMIT);
        }
    }

    fn clamp_to_board(&mut self) {
        self.x = self.x.clamp(-BOARD_LIMIT, BOARD_LIMIT);
        self.y = self.y.clamp(-BOARD_LIMIT, BOARD_LIMIT);
    }
}

/// Push two overlapping bodies apart and exchange momentum along the normal
fn resolve_collision(a: &mut Body, b: &mut Body) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let dist_sq = dx * dx + dy * dy;
    let min_dist = a.radius + b.radius;

    if dist_sq == 0.0 || dist_sq > min_dist * min_dist {
        return;
    }

    let dist = dist_sq.sqrt();
    let nx = dx / dist;
    let ny = dy / dist;
    let half_overlap = (min_dist - dist) * 0.5;

    a.x -= nx * half_overlap;
    a.y -= ny * half_overlap;
    b.x += nx * half_overlap;
    b.y += ny * half_overlap;
    a.clamp_to_board();
    b.clamp_to_board();

    let vel_along_normal = (b.vx - a.vx) * nx + (b.vy - a.vy) * ny;
    if vel_along_normal > 0.0 {
        return;
    }

    let impulse = -(1.0 + DISC_RESTITUTION) * vel_along_normal / 2.0;
    a.vx -= impulse * nx;
    a.vy -= impulse * ny;
    b.vx += impulse * nx;
    b.vy += impulse * ny;
}

/// Striker plus discs. Index 0 of `bodies` is the striker.
#[derive(Debug, Clone)]
pub struct DiscBoard {
    bodies: Vec<Body>,
    steps: u64,
}

impl DiscBoard {
    pub fn new(striker: Body, discs: Vec<Body>) -> Self {
        let mut bodies = Vec::with_capacity(discs.len() + 1);
        bodies.push(striker);
        bodies.extend(discs);
        Self { bodies, steps: 0 }
    }

    pub fn striker(&self) -> &Body {
        &self.bodies[0]
    }

    pub fn discs(&self) -> &[Body] {
        &self.bodies[1..]
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Steps simulated so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Launch the striker along `angle` (radians) with `power` in 0..=1
    pub fn strike(&mut self, angle: f32, power: f32) -> Result<(), PhysicsError> {
        if !angle.is_finite() {
            return Err(PhysicsError::InvalidAngle);
        }
        if !power.is_finite() || !(0.0..=1.0).contains(&power) {
            return Err(PhysicsError::InvalidPower);
        }
        let speed = power * STRIKE_SPEED;
        let striker = &mut self.bodies[0];
        striker.vx = angle.cos() * speed;
        striker.vy = angle.sin() * speed;
        Ok(())
    }

    /// Advance the simulation by `dt` seconds
    pub fn step(&mut self, dt: f32) {
        for body in self.bodies.iter_mut() {
            body.integrate(dt);
        }

        let n = self.bodies.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let (head, tail) = self.bodies.split_at_mut(j);
                resolve_collision(&mut head[i], &mut tail[0]);
            }
        }
        self.steps += 1;
    }

    pub fn is_at_rest(&self) -> bool {
        self.bodies.iter().all(Body::is_at_rest)
    }

    /// Step at the fixed rate until everything stops or `max_steps` run out.
    /// Returns the number of steps taken.
    pub fn run_until_rest(&mut self, max_steps: usize) -> usize {
        let mut taken = 0;
        while taken < max_steps && !self.is_at_rest() {
            self.step(STEP);
            taken += 1;
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_bounds(board: &DiscBoard) -> bool {
        board
            .bodies()
            .iter()
            .all(|b| b.x.abs() <= BOARD_LIMIT && b.y.abs() <= BOARD_LIMIT)
    }

    #[test]
    fn strike_rejects_bad_input() {
        let mut board = DiscBoard::new(Body::striker(0.0, -0.8), vec![]);
        assert_eq!(board.strike(f32::NAN, 0.5), Err(PhysicsError::InvalidAngle));
        assert_eq!(board.strike(0.0, 1.5), Err(PhysicsError::InvalidPower));
        assert_eq!(board.strike(0.0, -0.1), Err(PhysicsError::InvalidPower));
        assert_eq!(board.strike(0.0, f32::INFINITY), Err(PhysicsError::InvalidPower));
        assert!(board.is_at_rest());
    }

    #[test]
    fn strike_sets_striker_velocity() {
        let mut board = DiscBoard::new(Body::striker(0.0, 0.0), vec![]);
        board.strike(0.0, 1.0).unwrap();
        assert!((board.striker().vx - STRIKE_SPEED).abs() < 1e-6);
        assert!(board.striker().vy.abs() < 1e-6);
    }

    #[test]
    fn friction_brings_board_to_rest() {
        let mut board = DiscBoard::new(Body::striker(0.0, 0.0), vec![]);
        board.strike(0.3, 0.2).unwrap();
        let steps = board.run_until_rest(10_000);
        assert!(steps > 0 && steps < 10_000);
        assert!(board.is_at_rest());
    }

    #[test]
    fn walls_reflect_and_clamp() {
        let mut striker = Body::striker(0.99, 0.0);
        striker.vx = 2.0;
        let mut board = DiscBoard::new(striker, vec![]);
        board.step(STEP);
        assert_eq!(board.striker().x, BOARD_LIMIT);
        assert!(board.striker().vx < 0.0);
    }

    #[test]
    fn head_on_collision_transfers_momentum() {
        let mut board = DiscBoard::new(Body::striker(-0.2, 0.0), vec![Body::disc(0.0, 0.0)]);
        board.strike(0.0, 1.0).unwrap();
        for _ in 0..20 {
            board.step(STEP);
        }
        assert!(board.discs()[0].vx > 0.0);
        assert!(board.discs()[0].x > 0.0);
        assert!(board.striker().vx < board.discs()[0].vx);
    }

    #[test]
    fn bodies_stay_on_board() {
        let discs = (0..9)
            .map(|i| Body::disc(-0.3 + 0.1 * (i % 3) as f32, 0.5 + 0.1 * (i / 3) as f32))
            .collect();
        let mut board = DiscBoard::new(Body::striker(0.0, -0.8), discs);
        board.strike(std::f32::consts::FRAC_PI_2, 1.0).unwrap();
        for _ in 0..2_000 {
            board.step(STEP);
            assert!(in_bounds(&board));
        }
    }
}
