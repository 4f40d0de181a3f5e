// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use crate::common::app_config::config as inventory_app_config;

pub(crate) fn inventory_batch_size() -> usize {
    inventory_app_config()
        .ok()
        .map(|c| c.inventory.batch_size)
        .unwrap_or(1000)
}

pub(crate) fn inventory_sort_files() -> bool {
    inventory_app_config()
        .ok()
        .map(|c| c.inventory.sort_files)
        .unwrap_or(true)
}

pub(crate) fn inventory_tolerate_sort_failure() -> bool {
    inventory_app_config()
        .ok()
        .map(|c| c.inventory.tolerate_sort_failure)
        .unwrap_or(false)
}

pub(crate) fn opendal_read_block_size() -> usize {
    inventory_app_config()
        .ok()
        .map(|c| c.inventory.read_block_size)
        .unwrap_or(crate::fs::opendal::DEFAULT_OPENDAL_READ_SIZE)
}
