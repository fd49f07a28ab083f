// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod scheduler;

pub use self::scheduler::{Event, EventRef, EventScheduler, Phase};
