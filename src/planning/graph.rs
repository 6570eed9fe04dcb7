//! 先后约束图
//!
//! 邻接表 + 入度表上的 Kahn 拓扑排序；就绪节点按下标从小到大出队，因此声明顺序决定并列时的先后。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub(crate) struct PrecedenceGraph {
    /// 邻接表：节点 -> 必须排在它之后的节点
    adjacency: Vec<Vec<usize>>,
    /// 入度表：节点 -> 尚未排出的前驱数
    in_degree: Vec<usize>,
}

impl PrecedenceGraph {
    pub(crate) fn new(nodes: usize, edges: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut adjacency = vec![Vec::new(); nodes];
        let mut in_degree = vec![0; nodes];
        for (before, after) in edges {
            adjacency[before].push(after);
            in_degree[after] += 1;
        }
        Self {
            adjacency,
            in_degree,
        }
    }

    pub(crate) fn successors(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    /// 稳定拓扑序；存在环时返回 None
    pub(crate) fn topological_order(&self) -> Option<Vec<usize>> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.adjacency[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        (order.len() == in_degree.len()).then_some(order)
    }
}
