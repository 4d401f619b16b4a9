// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! Each slot owns an image-available semaphore and a fence created signaled.
//! Render-finished semaphores are per swapchain image: present may still be
//! waiting on one when the slot that signaled it comes around again.

use crate::context::Device;
use crate::handle::Owned;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use tracing::trace;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Slot bookkeeping for the draw loop. Holds no GPU objects.
#[derive(Debug)]
pub struct FrameRing {
    states: [SlotState; MAX_FRAMES_IN_FLIGHT],
    current: usize,
}

impl Default for FrameRing {
    fn default() -> Self {
        Self {
            states: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
            current: 0,
        }
    }
}

impl FrameRing {
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Frames submitted to the GPU whose slot has not been retired yet.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| matches!(s, SlotState::Submitted | SlotState::Presenting))
            .count()
    }

    /// The current slot's fence has been waited: its last frame is done.
    pub fn retired(&mut self) {
        let state = &mut self.states[self.current];
        debug_assert!(
            matches!(
                *state,
                SlotState::Idle | SlotState::Submitted | SlotState::Presenting
            ),
            "slot {} out of order",
            self.current
        );
        *state = SlotState::Idle;
    }

    pub fn begin_frame(&mut self) -> usize {
        self.step(SlotState::Idle, SlotState::Acquiring);
        self.current
    }

    pub fn acquired(&mut self) {
        self.step(SlotState::Acquiring, SlotState::Recording);
    }

    pub fn submitted(&mut self) {
        self.step(SlotState::Recording, SlotState::Submitted);
    }

    /// Present queued; moves on to the next slot.
    pub fn presented(&mut self) {
        self.step(SlotState::Submitted, SlotState::Presenting);
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    /// Acquire or recording failed: nothing was submitted from this slot.
    pub fn abandon(&mut self) {
        let state = &mut self.states[self.current];
        if matches!(*state, SlotState::Acquiring | SlotState::Recording) {
            *state = SlotState::Idle;
        }
    }

    fn step(&mut self, from: SlotState, to: SlotState) {
        let state = &mut self.states[self.current];
        debug_assert_eq!(*state, from, "slot {} out of order", self.current);
        *state = to;
    }
}

/// Which slot last submitted work targeting each swapchain image.
#[derive(Debug)]
pub struct ImageOwners(Vec<Option<usize>>);

impl ImageOwners {
    pub fn new(image_count: usize) -> Self {
        Self(vec![None; image_count])
    }

    /// Record `slot` as the owner of `image`. Returns the previous owner when
    /// it is another slot whose fence must be waited first.
    pub fn claim(&mut self, image: usize, slot: usize) -> Option<usize> {
        let previous = self.0[image].replace(slot);
        previous.filter(|&p| p != slot)
    }
}

struct FrameSlot {
    image_available: Owned<vk::Semaphore>,
    in_flight: Owned<vk::Fence>,
}

pub struct FrameSync {
    slots: Vec<FrameSlot>,
    render_finished: Vec<Owned<vk::Semaphore>>,
    owners: ImageOwners,
    ring: FrameRing,
    device: Arc<Device>,
}

fn semaphore(device: &Arc<Device>) -> Result<Owned<vk::Semaphore>> {
    let info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    let raw = unsafe { device.create_semaphore(&info, None) }.context("create_semaphore")?;
    Ok(Owned::new(device, raw))
}

impl FrameSync {
    pub fn new(device: &Arc<Device>, image_count: usize) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                let fence = unsafe { device.create_fence(&fence_info, None) }.context("create_fence")?;
                Ok(FrameSlot {
                    image_available: semaphore(device)?,
                    in_flight: Owned::new(device, fence),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let render_finished = (0..image_count)
            .map(|_| semaphore(device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            render_finished,
            owners: ImageOwners::new(image_count),
            ring: FrameRing::default(),
            device: Arc::clone(device),
        })
    }

    /// Steps 1 and 2: wait for the current slot's previous frame, retire it, then reset its fence.
    pub fn begin_frame(&mut self) -> Result<usize> {
        let slot = self.ring.current();
        let fence = self.slots[slot].in_flight.raw();
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
                .context("wait_for_fences")?;
        }
        self.ring.retired();
        trace!("frame slot {} retired", slot);
        unsafe {
            self.device
                .reset_fences(std::slice::from_ref(&fence))
                .context("reset_fences")?;
        }
        Ok(self.ring.begin_frame())
    }

    /// After acquire: wait out any other slot still rendering into `image`.
    pub fn claim_image(&mut self, image: u32) -> Result<()> {
        let slot = self.ring.current();
        if let Some(other) = self.owners.claim(image as usize, slot) {
            let fence = self.slots[other].in_flight.raw();
            unsafe {
                self.device
                    .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)
                    .context("wait_for_fences(image)")?;
            }
        }
        self.ring.acquired();
        Ok(())
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.slots[self.ring.current()].image_available.raw()
    }

    pub fn in_flight_fence(&self) -> vk::Fence {
        self.slots[self.ring.current()].in_flight.raw()
    }

    pub fn render_finished(&self, image: u32) -> vk::Semaphore {
        self.render_finished[image as usize].raw()
    }

    pub fn ring_mut(&mut self) -> &mut FrameRing {
        &mut self.ring
    }
}
