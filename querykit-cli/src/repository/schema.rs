// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Schema management for the issue tracker

use super::statements::{CREATE_ISSUES, DROP_ISSUES};
use querykit::{Context, Params, QueryHelper, Result};

pub struct SchemaRepository {
    helper: QueryHelper,
}

impl SchemaRepository {
    pub fn new(helper: QueryHelper) -> Self {
        Self { helper }
    }

    pub async fn create_schema(&self, ctx: &Context) -> Result<()> {
        log::debug!("creating issue tracker schema");
        self.helper.execute(ctx, CREATE_ISSUES, &Params::new()).await
    }

    pub async fn drop_schema(&self, ctx: &Context) -> Result<()> {
        log::debug!("dropping issue tracker schema");
        self.helper.execute(ctx, DROP_ISSUES, &Params::new()).await
    }
}
