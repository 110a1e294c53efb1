//! Configuration enumeration.

use crate::models::{Configuration, EnumerationConfig};

/// Produces the filter × sort × page size cross product.
#[derive(Debug, Clone)]
pub struct ConfigEnumerator<'a> {
    axes: &'a EnumerationConfig,
}

impl<'a> ConfigEnumerator<'a> {
    pub fn new(axes: &'a EnumerationConfig) -> Self {
        Self { axes }
    }

    /// Number of configurations [`enumerate`](Self::enumerate) yields.
    pub fn len(&self) -> usize {
        self.axes.filters.len() * self.axes.sort_orders.len() * self.axes.page_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All configurations, filter-major, then sort order, then page size.
    pub fn enumerate(&self) -> Vec<Configuration> {
        let mut configurations = Vec::with_capacity(self.len());
        for filter in &self.axes.filters {
            for sort_order in &self.axes.sort_orders {
                for &page_size in &self.axes.page_sizes {
                    configurations.push(Configuration::new(
                        filter.clone(),
                        sort_order.clone(),
                        page_size,
                    ));
                }
            }
        }
        configurations
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::models::FilterExpression;

    #[test]
    fn test_default_axes_give_252() {
        let axes = EnumerationConfig::default();
        let enumerator = ConfigEnumerator::new(&axes);

        let configurations = enumerator.enumerate();
        assert_eq!(enumerator.len(), 252);
        assert_eq!(configurations.len(), 252);

        let labels: HashSet<_> = configurations.iter().map(|c| c.label()).collect();
        assert_eq!(labels.len(), 252);
    }

    #[test]
    fn test_order_is_deterministic() {
        let axes = EnumerationConfig {
            filters: vec![
                FilterExpression::new("f1", "q=(And.A.1._.B.1.)"),
                FilterExpression::new("f2", "q=(And.A.2._.B.2.)"),
            ],
            sort_orders: vec!["PriceAsc".into(), "Year".into()],
            page_sizes: vec![50, 20],
        };

        let labels: Vec<_> = ConfigEnumerator::new(&axes)
            .enumerate()
            .iter()
            .map(|c| c.label())
            .collect();
        assert_eq!(
            labels,
            vec![
                "f1_PriceAsc_50",
                "f1_PriceAsc_20",
                "f1_Year_50",
                "f1_Year_20",
                "f2_PriceAsc_50",
                "f2_PriceAsc_20",
                "f2_Year_50",
                "f2_Year_20",
            ]
        );
    }

    #[test]
    fn test_empty_axis_yields_nothing() {
        let axes = EnumerationConfig {
            sort_orders: Vec::new(),
            ..EnumerationConfig::default()
        };
        let enumerator = ConfigEnumerator::new(&axes);
        assert!(enumerator.is_empty());
        assert!(enumerator.enumerate().is_empty());
    }
}
