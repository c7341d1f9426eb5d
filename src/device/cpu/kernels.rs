//! Rust implementations of every kernel, mirroring the WGSL sources.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::device::{BufferId, DeviceError};
use crate::dispatch::{param, slot, DispatchRecord, KernelId};
use crate::simulation::params::{BrushMode, VisualizeMode};

#[derive(Clone, Copy)]
struct GridView<'a> {
    data: &'a [f32],
    res: usize,
    comps: usize,
}

impl GridView<'_> {
    #[inline]
    fn at(&self, x: usize, y: usize, k: usize) -> f32 {
        self.data[(y * self.res + x) * self.comps + k]
    }

    /// Neighbour lookup; coordinates outside the grid resolve to the centre cell.
    #[inline]
    fn neighbour(&self, x: usize, y: usize, dx: i64, dy: i64, k: usize) -> f32 {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        let n = self.res as i64;
        if nx < 0 || ny < 0 || nx >= n || ny >= n {
            self.at(x, y, k)
        } else {
            self.at(nx as usize, ny as usize, k)
        }
    }

    /// Neighbour lookup; coordinates outside the grid read as zero.
    #[inline]
    fn neighbour_or_zero(&self, x: usize, y: usize, dx: i64, dy: i64, k: usize) -> f32 {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        let n = self.res as i64;
        if nx < 0 || ny < 0 || nx >= n || ny >= n {
            0.0
        } else {
            self.at(nx as usize, ny as usize, k)
        }
    }

    /// Bilinear sample at a cell-space position, clamped to the grid.
    fn bilinear(&self, px: f32, py: f32, k: usize) -> f32 {
        let max = (self.res - 1) as f32;
        let px = px.clamp(0.0, max);
        let py = py.clamp(0.0, max);
        let x0 = px.floor() as usize;
        let y0 = py.floor() as usize;
        let x1 = (x0 + 1).min(self.res - 1);
        let y1 = (y0 + 1).min(self.res - 1);
        let tx = px - x0 as f32;
        let ty = py - y0 as f32;

        let a = self.at(x0, y0, k);
        let b = self.at(x1, y0, k);
        let c = self.at(x0, y1, k);
        let d = self.at(x1, y1, k);
        let bottom = a + (b - a) * tx;
        let top = c + (d - c) * tx;
        bottom + (top - bottom) * ty
    }
}

struct GridViewMut<'a> {
    data: &'a mut [f32],
    res: usize,
    comps: usize,
}

impl GridViewMut<'_> {
    /// Run `f(x, y, cell)` on every cell inside `extent`, in parallel.
    fn for_each_cell<F>(&mut self, extent: (usize, usize), f: F)
    where
        F: Fn(usize, usize, &mut [f32]) + Sync,
    {
        let res = self.res;
        self.data
            .par_chunks_mut(self.comps)
            .enumerate()
            .for_each(|(i, cell)| {
                let (x, y) = (i % res, i / res);
                if x < extent.0 && y < extent.1 {
                    f(x, y, cell);
                }
            });
    }

    /// Run `f(i, cell)` on the first `active` cells of a flat dispatch.
    fn for_each_linear<F>(&mut self, active: usize, f: F)
    where
        F: Fn(usize, &mut [f32]) + Sync,
    {
        self.data
            .par_chunks_mut(self.comps)
            .enumerate()
            .take(active)
            .for_each(|(i, cell)| f(i, cell));
    }
}

struct KernelArgs<'a> {
    record: &'a DispatchRecord,
    reads: Vec<(&'static str, GridView<'a>)>,
    writes: Vec<(&'static str, GridViewMut<'a>)>,
}

impl<'a> KernelArgs<'a> {
    fn read(&self, name: &str) -> Result<GridView<'a>, DeviceError> {
        self.reads
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| self.missing(name))
    }

    fn write(&mut self, name: &str) -> Result<GridViewMut<'a>, DeviceError> {
        let index = self
            .writes
            .iter()
            .position(|(n, _)| *n == name)
            .ok_or_else(|| self.missing(name))?;
        Ok(self.writes.swap_remove(index).1)
    }

    fn missing(&self, name: &str) -> DeviceError {
        DeviceError::Execution {
            kernel: self.record.kernel,
            reason: format!("slot '{name}' is not available"),
        }
    }

    fn require_components(&self, name: &str, comps: usize, needed: usize) -> Result<(), DeviceError> {
        if comps < needed {
            return Err(DeviceError::Execution {
                kernel: self.record.kernel,
                reason: format!("slot '{name}' has {comps} components, needs {needed}"),
            });
        }
        Ok(())
    }

    /// Cells of a 2D dispatch covered by the launched threads.
    fn extent(&self, res: usize) -> (usize, usize) {
        let t = self.record.launched_threads();
        ((t[0] as usize).min(res), (t[1] as usize).min(res))
    }

    /// Items of a flat dispatch covered by the launched threads.
    fn active(&self, len: usize) -> usize {
        (self.record.launched_threads()[0] as usize).min(len)
    }
}

/// Execute one dispatch against host storage.
///
/// Written slots are moved out of `storage` for the duration of the kernel so they can be
/// borrowed mutably next to the read-only slots; the queue guarantees they do not alias.
pub(super) fn run(
    record: &DispatchRecord,
    storage: &mut HashMap<BufferId, Vec<f32>>,
) -> Result<(), DeviceError> {
    let mut taken: Vec<(usize, BufferId, Vec<f32>)> = Vec::new();
    let mut result = Ok(());
    for (index, bound) in record.slots.iter().enumerate() {
        if !bound.access.writes() {
            continue;
        }
        match storage.get_mut(&bound.buffer.id) {
            Some(data) => taken.push((index, bound.buffer.id, std::mem::take(data))),
            None => {
                result = Err(DeviceError::UnknownBuffer(bound.buffer.id));
                break;
            }
        }
    }

    if result.is_ok() {
        result = execute(record, storage, &mut taken);
    }

    for (_, id, data) in taken {
        if let Some(slot) = storage.get_mut(&id) {
            *slot = data;
        }
    }
    result
}

fn execute(
    record: &DispatchRecord,
    storage: &HashMap<BufferId, Vec<f32>>,
    taken: &mut [(usize, BufferId, Vec<f32>)],
) -> Result<(), DeviceError> {
    let mut reads = Vec::new();
    for bound in record.slots.iter().filter(|s| !s.access.writes()) {
        let data = storage
            .get(&bound.buffer.id)
            .ok_or(DeviceError::UnknownBuffer(bound.buffer.id))?;
        check_len(bound.buffer.id, bound.buffer.len(), data.len())?;
        reads.push((
            bound.name,
            GridView {
                data,
                res: bound.buffer.resolution as usize,
                comps: bound.buffer.components as usize,
            },
        ));
    }

    let mut writes = Vec::new();
    for (index, id, data) in taken.iter_mut() {
        let bound = &record.slots[*index];
        check_len(*id, bound.buffer.len(), data.len())?;
        writes.push((
            bound.name,
            GridViewMut {
                data: data.as_mut_slice(),
                res: bound.buffer.resolution as usize,
                comps: bound.buffer.components as usize,
            },
        ));
    }

    let mut args = KernelArgs { record, reads, writes };
    match record.kernel {
        KernelId::AddDye => add_dye(&mut args),
        KernelId::AddForce => add_force(&mut args),
        KernelId::Advection => advection(&mut args),
        KernelId::JacobiSolve => jacobi_solve(&mut args),
        KernelId::Divergence => divergence(&mut args),
        KernelId::SubtractGradient => subtract_gradient(&mut args),
        KernelId::Boundary => boundary(&mut args),
        KernelId::CopyBuffer => copy_buffer(&mut args),
        KernelId::ClearBuffer => clear_buffer(&mut args),
        KernelId::WaveOperation => wave_operation(&mut args),
        KernelId::InitWaterHeight => init_water_height(&mut args),
        KernelId::PressureControl => pressure_control(&mut args),
        KernelId::FluxComputation => flux_computation(&mut args),
        KernelId::FluxApply => flux_apply(&mut args),
        KernelId::Visualize => visualize(&mut args),
    }
}

fn check_len(id: BufferId, expected: usize, found: usize) -> Result<(), DeviceError> {
    if expected != found {
        return Err(DeviceError::SizeMismatch { id, expected, found });
    }
    Ok(())
}

/// Weight of a round brush at distance `d`: `(1 - d/r)^falloff` inside the radius, zero outside.
fn brush_weight(d: f32, radius: f32, falloff: f32) -> f32 {
    if radius <= 0.0 || d >= radius {
        return 0.0;
    }
    (1.0 - d / radius).powf(falloff.max(0.0))
}

fn cell_distance(x: usize, y: usize, p: [f32; 2]) -> f32 {
    let dx = x as f32 + 0.5 - p[0];
    let dy = y as f32 + 0.5 - p[1];
    (dx * dx + dy * dy).sqrt()
}

fn add_dye(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let r = args.record;
    let pressed = r.f32_param(param::MOUSE_PRESSED)?;
    let pos = r.vec2_param(param::MOUSE_POSITION)?;
    let color = r.vec4_param(param::DYE_COLOR)?;
    let radius = r.f32_param(param::DYE_RADIUS)?;
    let falloff = r.f32_param(param::DYE_FALLOFF)?;
    let mut dye = args.write(slot::DYE_BUFFER)?;
    if pressed <= 0.5 {
        return Ok(());
    }

    let extent = args.extent(dye.res);
    dye.for_each_cell(extent, |x, y, cell| {
        let w = brush_weight(cell_distance(x, y, pos), radius, falloff);
        if w > 0.0 {
            for (value, c) in cell.iter_mut().zip(color.iter()) {
                *value += (c - *value) * w;
            }
        }
    });
    Ok(())
}

fn add_force(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let r = args.record;
    let pressed = r.f32_param(param::MOUSE_PRESSED)?;
    let pos = r.vec2_param(param::MOUSE_POSITION)?;
    let prev = r.vec2_param(param::MOUSE_POSITION_PREV)?;
    let radius = r.f32_param(param::FORCE_RADIUS)?;
    let strength = r.f32_param(param::FORCE_STRENGTH)?;
    let mut velocity = args.write(slot::VELOCITY_BUFFER)?;
    args.require_components(slot::VELOCITY_BUFFER, velocity.comps, 2)?;
    if pressed <= 0.5 {
        return Ok(());
    }

    let impulse = [(pos[0] - prev[0]) * strength, (pos[1] - prev[1]) * strength];
    let extent = args.extent(velocity.res);
    velocity.for_each_cell(extent, |x, y, cell| {
        let w = brush_weight(cell_distance(x, y, pos), radius, 1.0);
        cell[0] += impulse[0] * w;
        cell[1] += impulse[1] * w;
    });
    Ok(())
}

fn advection(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let dt = args.record.f32_param(param::TIME_STEP)?;
    let dissipation = args.record.f32_param(param::DISSIPATION)?;
    let velocity = args.read(slot::VELOCITY_FIELD)?;
    let source = args.read(slot::FIELD_TO_ADVECT)?;
    let mut out = args.write(slot::NEW_ADVECTED_FIELD)?;
    args.require_components(slot::VELOCITY_FIELD, velocity.comps, 2)?;

    let comps = source.comps.min(out.comps);
    let extent = args.extent(out.res);
    out.for_each_cell(extent, |x, y, cell| {
        let px = x as f32 - dt * velocity.at(x, y, 0);
        let py = y as f32 - dt * velocity.at(x, y, 1);
        for (k, value) in cell.iter_mut().enumerate() {
            *value = if k < comps {
                dissipation * source.bilinear(px, py, k)
            } else {
                0.0
            };
        }
    });
    Ok(())
}

fn jacobi_solve(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let center_factor = args.record.f32_param(param::CENTER_FACTOR)?;
    let r_diagonal = args.record.f32_param(param::R_DIAGONAL)?;
    let b = args.read(slot::B_BUFFER)?;
    let x_in = args.read(slot::UPDATED_X)?;
    let mut out = args.write(slot::RESULTS)?;

    let comps = b.comps.min(x_in.comps).min(out.comps);
    let extent = args.extent(out.res);
    out.for_each_cell(extent, |x, y, cell| {
        for (k, value) in cell.iter_mut().enumerate() {
            *value = if k < comps {
                let sum = x_in.neighbour(x, y, -1, 0, k)
                    + x_in.neighbour(x, y, 1, 0, k)
                    + x_in.neighbour(x, y, 0, -1, k)
                    + x_in.neighbour(x, y, 0, 1, k);
                (sum + center_factor * b.at(x, y, k)) * r_diagonal
            } else {
                0.0
            };
        }
    });
    Ok(())
}

fn divergence(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let scale = args.record.f32_param(param::DIVERGENCE_SCALE)?;
    let velocity = args.read(slot::VELOCITY_FIELD)?;
    let mut out = args.write(slot::DIVERGENCE_OUT)?;
    args.require_components(slot::VELOCITY_FIELD, velocity.comps, 2)?;

    let extent = args.extent(out.res);
    out.for_each_cell(extent, |x, y, cell| {
        let du = velocity.neighbour(x, y, 1, 0, 0) - velocity.neighbour(x, y, -1, 0, 0);
        let dv = velocity.neighbour(x, y, 0, 1, 1) - velocity.neighbour(x, y, 0, -1, 1);
        cell.fill(0.0);
        cell[0] = 0.5 * (du + dv) * scale;
    });
    Ok(())
}

fn subtract_gradient(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let scale = args.record.f32_param(param::GRADIENT_SCALE)?;
    let pressure = args.read(slot::PRESSURE_BUFFER)?;
    let mut velocity = args.write(slot::VELOCITY_BUFFER)?;
    args.require_components(slot::VELOCITY_BUFFER, velocity.comps, 2)?;

    let extent = args.extent(velocity.res);
    velocity.for_each_cell(extent, |x, y, cell| {
        let gx = 0.5 * (pressure.neighbour(x, y, 1, 0, 0) - pressure.neighbour(x, y, -1, 0, 0));
        let gy = 0.5 * (pressure.neighbour(x, y, 0, 1, 0) - pressure.neighbour(x, y, 0, -1, 0));
        cell[0] -= scale * gx;
        cell[1] -= scale * gy;
    });
    Ok(())
}

/// Edge cell written by boundary work item `i` and the interior cell it copies, as flat
/// cell indices. Items run bottom row, top row, left column, right column; the side columns
/// skip the corners, which the rows already own.
pub(crate) fn boundary_pair(i: usize, n: usize) -> Option<(usize, usize)> {
    if n < 3 || i >= 4 * n {
        return None;
    }
    let side = i / n;
    let t = i % n;
    let last = n - 1;
    let inner = t.clamp(1, n - 2);
    let idx = |x: usize, y: usize| y * n + x;
    match side {
        0 => Some((idx(t, 0), idx(inner, 1))),
        1 => Some((idx(t, last), idx(inner, last - 1))),
        2 if t > 0 && t < last => Some((idx(0, t), idx(1, t))),
        3 if t > 0 && t < last => Some((idx(last, t), idx(last - 1, t))),
        _ => None,
    }
}

fn boundary(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let scale = args.record.f32_param(param::BOUNDARY_SCALE)?;
    let mut field = args.write(slot::BOUNDARY_FIELD)?;
    let n = field.res;
    let comps = field.comps;
    let active = args.active(4 * n);

    let pairs: Vec<(usize, usize)> = (0..active)
        .into_par_iter()
        .filter_map(|i| boundary_pair(i, n))
        .collect();
    // Sources are interior cells and never written here.
    for (dst, src) in pairs {
        for k in 0..comps {
            field.data[dst * comps + k] = scale * field.data[src * comps + k];
        }
    }
    Ok(())
}

fn copy_buffer(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let source = args.read(slot::COPY_SOURCE)?;
    let mut target = args.write(slot::COPY_TARGET)?;
    let comps = source.comps.min(target.comps);
    let active = args.active(source.res * source.res);
    let src_comps = source.comps;

    target.for_each_linear(active, |i, cell| {
        for (k, value) in cell.iter_mut().enumerate() {
            *value = if k < comps { source.data[i * src_comps + k] } else { 0.0 };
        }
    });
    Ok(())
}

fn clear_buffer(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let value = args.record.f32_param(param::CLEAR_VALUE)?;
    let mut target = args.write(slot::CLEAR_TARGET)?;
    let active = args.active(target.res * target.res);
    target.for_each_linear(active, |_, cell| cell.fill(value));
    Ok(())
}

fn wave_operation(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let r = args.record;
    let time = r.f32_param(param::TIME)?;
    let count = r.u32_param(param::WAVE_COUNT)? as usize;
    let waves = r.vec4_array_param(param::WAVES)?;
    let base_height = r.f32_param(param::WAVE_HEIGHT)?;
    let max_depth = r.f32_param(param::MAX_DEPTH)?;
    let gravity = r.f32_param(param::GRAVITY)?;
    let depth = args.read(slot::WATER_DEPTH_MAP)?;
    let mut out = args.write(slot::WAVE_BUFFER)?;
    args.require_components(slot::WAVE_BUFFER, out.comps, 4)?;

    let waves = &waves[..count.min(waves.len())];
    let n = waves.len().max(1) as f32;
    let extent = args.extent(out.res);
    out.for_each_cell(extent, |x, y, cell| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let mut offset = [0.0f32; 3];
        for wave in waves {
            let amplitude = wave[0];
            let (sin_d, cos_d) = wave[1].to_radians().sin_cos();
            let k = std::f32::consts::TAU / wave[2].max(1e-3);
            let speed = (gravity / k).sqrt();
            let f = k * (cos_d * px + sin_d * py - speed * time);
            let steepness = if amplitude > 0.0 {
                (1.0 / (k * amplitude * n)).min(1.0)
            } else {
                0.0
            };
            let (sin_f, cos_f) = f.sin_cos();
            offset[0] += steepness * amplitude * cos_d * cos_f;
            offset[1] += amplitude * sin_f;
            offset[2] += steepness * amplitude * sin_d * cos_f;
        }
        let attenuation = if max_depth > 0.0 {
            (depth.at(x, y, 0) / max_depth).clamp(0.0, 1.0)
        } else {
            1.0
        };
        cell[0] = offset[0] * attenuation;
        cell[1] = base_height + offset[1] * attenuation;
        cell[2] = offset[2] * attenuation;
        cell[3] = attenuation;
    });
    Ok(())
}

fn init_water_height(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let level = args.record.f32_param(param::WATER_HEIGHT)?;
    let mut terrain = args.write(slot::HEIGHT_MAP)?;
    args.require_components(slot::HEIGHT_MAP, terrain.comps, 2)?;
    let extent = args.extent(terrain.res);
    terrain.for_each_cell(extent, |_, _, cell| {
        cell[1] = (level - cell[0]).max(0.0);
    });
    Ok(())
}

fn pressure_control(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let brush = args.record.vec4_param(param::BRUSH)?;
    let mode_index = args.record.u32_param(param::BRUSH_MODE)?;
    let dt = args.record.f32_param(param::TIME_STEP)?;
    let mode = BrushMode::from_index(mode_index).ok_or_else(|| DeviceError::Execution {
        kernel: args.record.kernel,
        reason: format!("unknown brush mode {mode_index}"),
    })?;
    let mut terrain = args.write(slot::HEIGHT_MAP)?;
    args.require_components(slot::HEIGHT_MAP, terrain.comps, 2)?;

    let [bx, by, radius, amount] = brush;
    if amount == 0.0 || radius <= 0.0 {
        return Ok(());
    }
    let n = terrain.res as f32;
    let extent = args.extent(terrain.res);
    terrain.for_each_cell(extent, |x, y, cell| {
        let u = (x as f32 + 0.5) / n - bx;
        let v = (y as f32 + 0.5) / n - by;
        let d = (u * u + v * v).sqrt();
        if d >= radius {
            return;
        }
        let t = 1.0 - d / radius;
        let delta = amount.abs() * dt * t * t * (3.0 - 2.0 * t);
        match mode {
            BrushMode::AddWater => cell[1] += delta,
            BrushMode::RemoveWater => cell[1] = (cell[1] - delta).max(0.0),
            BrushMode::AddTerrain => cell[0] += delta,
            BrushMode::RemoveTerrain => cell[0] -= delta,
        }
    });
    Ok(())
}

/// Flux lanes: left, right, top (+y), bottom (-y).
const FLUX_DIRS: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, 1), (0, -1)];

fn flux_computation(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let r = args.record;
    let dt = r.f32_param(param::TIME_STEP)?;
    let gravity = r.f32_param(param::GRAVITY)?;
    let pipe_area = r.f32_param(param::PIPE_AREA)?;
    let pipe_length = r.f32_param(param::PIPE_LENGTH)?;
    let cell_size = r.vec2_param(param::CELL_SIZE)?;
    let terrain = args.read(slot::HEIGHT_MAP)?;
    let mut flux = args.write(slot::FLUX_MAP)?;
    args.require_components(slot::HEIGHT_MAP, terrain.comps, 2)?;
    args.require_components(slot::FLUX_MAP, flux.comps, 4)?;

    let n = terrain.res as i64;
    let extent = args.extent(flux.res);
    flux.for_each_cell(extent, |x, y, cell| {
        let water = terrain.at(x, y, 1);
        let height = terrain.at(x, y, 0) + water;
        let mut total = 0.0;
        for (lane, (dx, dy)) in FLUX_DIRS.iter().enumerate() {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            let outflow = if nx < 0 || ny < 0 || nx >= n || ny >= n {
                0.0
            } else {
                let (nx, ny) = (nx as usize, ny as usize);
                let dh = height - (terrain.at(nx, ny, 0) + terrain.at(nx, ny, 1));
                (cell[lane] + dt * pipe_area * gravity * dh / pipe_length).max(0.0)
            };
            cell[lane] = outflow;
            total += outflow;
        }

        // Never let more water leave than the cell holds.
        let volume = water * cell_size[0] * cell_size[1];
        if total * dt > volume && total > 0.0 {
            let k = volume / (total * dt);
            for lane in cell.iter_mut().take(4) {
                *lane *= k;
            }
        }
    });
    Ok(())
}

fn flux_apply(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let r = args.record;
    let dt = r.f32_param(param::TIME_STEP)?;
    let cell_size = r.vec2_param(param::CELL_SIZE)?;
    let rain = r.f32_param(param::RAIN_RATE)?;
    let evaporation = r.f32_param(param::EVAPORATION)?;
    let flux = args.read(slot::FLUX_MAP)?;
    let mut terrain = args.write(slot::HEIGHT_MAP)?;
    let mut velocity = args.write(slot::VELOCITY_MAP)?;
    args.require_components(slot::FLUX_MAP, flux.comps, 4)?;
    args.require_components(slot::HEIGHT_MAP, terrain.comps, 2)?;
    args.require_components(slot::VELOCITY_MAP, velocity.comps, 2)?;

    let area = cell_size[0] * cell_size[1];
    let extent = args.extent(terrain.res);

    // Velocity depends on the water depth before this pass, so it is computed first.
    {
        let water = GridView {
            data: &*terrain.data,
            res: terrain.res,
            comps: terrain.comps,
        };
        velocity.for_each_cell(extent, |x, y, cell| {
            let (from_left, from_right, from_top, from_bottom, outflow) = exchange(&flux, x, y);
            let before = water.at(x, y, 1);
            let after = before + dt * ((from_left + from_right + from_top + from_bottom) - outflow) / area;
            let mean_depth = 0.5 * (before + after);
            let dwx = 0.5 * (from_left - flux.at(x, y, 0) + flux.at(x, y, 1) - from_right);
            let dwy = 0.5 * (from_bottom - flux.at(x, y, 3) + flux.at(x, y, 2) - from_top);
            if mean_depth > 1e-5 {
                cell[0] = dwx / (mean_depth * cell_size[1]);
                cell[1] = dwy / (mean_depth * cell_size[0]);
            } else {
                cell[0] = 0.0;
                cell[1] = 0.0;
            }
        });
    }

    let retain = (1.0 - evaporation * dt).max(0.0);
    terrain.for_each_cell(extent, |x, y, cell| {
        let (from_left, from_right, from_top, from_bottom, outflow) = exchange(&flux, x, y);
        let inflow = from_left + from_right + from_top + from_bottom;
        let water = cell[1] + dt * (inflow - outflow) / area + rain * dt;
        cell[1] = (water * retain).max(0.0);
    });
    Ok(())
}

/// Inflow from the left, right, top and bottom neighbours, plus this cell's total outflow.
fn exchange(flux: &GridView, x: usize, y: usize) -> (f32, f32, f32, f32, f32) {
    let from_left = flux.neighbour_or_zero(x, y, -1, 0, 1);
    let from_right = flux.neighbour_or_zero(x, y, 1, 0, 0);
    let from_top = flux.neighbour_or_zero(x, y, 0, 1, 3);
    let from_bottom = flux.neighbour_or_zero(x, y, 0, -1, 2);
    let outflow = (0..4).map(|k| flux.at(x, y, k)).sum();
    (from_left, from_right, from_top, from_bottom, outflow)
}

fn visualize(args: &mut KernelArgs) -> Result<(), DeviceError> {
    let mode_index = args.record.u32_param(param::VISUALIZE_MODE)?;
    let [lo, hi] = args.record.vec2_param(param::VALUE_RANGE)?;
    let mode = VisualizeMode::from_index(mode_index).ok_or_else(|| DeviceError::Execution {
        kernel: args.record.kernel,
        reason: format!("unknown visualize mode {mode_index}"),
    })?;
    let source = args.read(slot::VISUALIZE_SOURCE)?;
    let mut display = args.write(slot::DISPLAY_TEXTURE)?;
    args.require_components(slot::DISPLAY_TEXTURE, display.comps, 4)?;

    let span = if (hi - lo).abs() > f32::EPSILON { hi - lo } else { 1.0 };
    let normalize = |v: f32| ((v - lo) / span).clamp(0.0, 1.0);
    let ratio = source.res as f32 / display.res as f32;
    let extent = args.extent(display.res);
    display.for_each_cell(extent, |px, py, cell| {
        let sx = (((px as f32 + 0.5) * ratio) as usize).min(source.res - 1);
        let sy = (((py as f32 + 0.5) * ratio) as usize).min(source.res - 1);
        let get = |k: usize| if k < source.comps { source.at(sx, sy, k) } else { 0.0 };
        let rgb = match mode {
            VisualizeMode::Color => [get(0), get(1), get(2)].map(|c| c.clamp(0.0, 1.0)),
            VisualizeMode::Scalar => [normalize(get(0)); 3],
            VisualizeMode::Terrain => {
                let s = normalize(get(0));
                let land = [0.35 + 0.4 * s, 0.3 + 0.45 * s, 0.2 + 0.3 * s];
                let wet = (get(1) * 10.0).clamp(0.0, 1.0);
                let water = [0.1, 0.3, 0.8];
                [0, 1, 2].map(|k| land[k] + (water[k] - land[k]) * wet)
            }
            VisualizeMode::Wave => {
                let v = normalize(get(1));
                let deep = [0.02, 0.1, 0.3];
                let crest = [0.6, 0.8, 1.0];
                [0, 1, 2].map(|k| deep[k] + (crest[k] - deep[k]) * v)
            }
        };
        cell[..3].copy_from_slice(&rgb);
        cell[3] = 1.0;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_pairs_cover_edges_once() {
        let n = 8;
        let mut written = vec![0u32; n * n];
        for i in 0..4 * n {
            if let Some((dst, src)) = boundary_pair(i, n) {
                written[dst] += 1;
                let (sx, sy) = (src % n, src / n);
                assert!(sx >= 1 && sx <= n - 2 && sy >= 1 && sy <= n - 2, "source must be interior");
            }
        }
        for y in 0..n {
            for x in 0..n {
                let edge = x == 0 || y == 0 || x == n - 1 || y == n - 1;
                assert_eq!(written[y * n + x], u32::from(edge), "cell ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_corners_copy_diagonal_interior() {
        let n = 6;
        assert_eq!(boundary_pair(0, n), Some((0, n + 1)));
        assert_eq!(boundary_pair(n - 1, n), Some((n - 1, n + n - 2)));
        assert_eq!(boundary_pair(n, n), Some(((n - 1) * n, (n - 2) * n + 1)));
        assert_eq!(boundary_pair(2 * n, n), None);
        assert_eq!(boundary_pair(3 * n - 1, n), None);
    }

    #[test]
    fn test_brush_weight() {
        assert_eq!(brush_weight(0.0, 4.0, 2.0), 1.0);
        assert_eq!(brush_weight(4.0, 4.0, 2.0), 0.0);
        assert_eq!(brush_weight(2.0, 4.0, 2.0), 0.25);
        assert_eq!(brush_weight(1.0, 0.0, 2.0), 0.0);
    }

    #[test]
    fn test_bilinear_exact_at_cell_centres() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let view = GridView { data: &data, res: 4, comps: 1 };
        assert_eq!(view.bilinear(2.0, 1.0, 0), 6.0);
        assert_eq!(view.bilinear(1.5, 0.0, 0), 1.5);
        assert_eq!(view.bilinear(-3.0, 10.0, 0), 12.0);
    }
}
