/*
 * This file is part of thermgov.
 *
 * Copyright (C) 2025 thermgov contributors
 *
 * thermgov is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * thermgov is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with thermgov. If not, see <https://www.gnu.org/licenses/>.
 */

//! thermgov - temperature driven core hotplug and frequency capping
//!
//! The governor itself lives in `tg-core` and runs inside `thermgovd`
//! (`tg-daemon`). This crate provides `tgctl`, the operator front end.

pub mod cli;
pub mod commands;
