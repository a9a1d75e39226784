// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod repositories;
pub mod swarm_bus;

pub use swarm_bus::{BusError, DeliveryReport, MessageReceiver, SubscriptionId, SwarmBus};
