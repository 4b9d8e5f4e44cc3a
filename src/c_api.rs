use crate::body::Body;
use crate::octree::Node;
use crate::simulation::Simulation;
use crate::utils::{self, DiskArgs};

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_Create(num_bodies: usize) -> *mut Simulation {
    let mut bodies = vec![Body::default(); num_bodies];
    if utils::disk(&mut bodies, &DiskArgs::default()).is_err() {
        return std::ptr::null_mut();
    }
    Box::into_raw(Box::new(Simulation::with_bodies(bodies)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_Destroy(handle: *mut Simulation) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle)) };
    }
}

/// Advance the simulation by one step. Returns false if the step failed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_Update(handle: *mut Simulation, dt: f32) -> bool {
    match unsafe { handle.as_mut() } {
        Some(sim) => sim.update(dt).is_ok(),
        None => false,
    }
}

/// Route subsequent steps through the GPU backend. Returns false when the
/// backend cannot be created.
#[cfg(feature = "gpu")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_SetUseGpu(handle: *mut Simulation, use_gpu: bool) -> bool {
    match unsafe { handle.as_mut() } {
        Some(sim) if use_gpu => sim.enable_gpu().is_ok(),
        Some(sim) => {
            sim.use_gpu = false;
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_GetBodyCount(handle: *const Simulation) -> usize {
    unsafe { handle.as_ref() }.map_or(0, |sim| sim.bodies.len())
}

/// Read-only view of the body array for the renderer. Valid until the next
/// update or destroy.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_GetBodies(handle: *const Simulation) -> *const Body {
    unsafe { handle.as_ref() }.map_or(std::ptr::null(), |sim| sim.bodies.as_ptr())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_GetNodeCount(handle: *const Simulation) -> usize {
    unsafe { handle.as_ref() }.map_or(0, |sim| sim.octree.nodes().len())
}

/// Read-only view of the octree node array for the renderer. Valid until
/// the next update or destroy.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Simulation_GetNodes(handle: *const Simulation) -> *const Node {
    unsafe { handle.as_ref() }.map_or(std::ptr::null(), |sim| sim.octree.nodes().as_ptr())
}
